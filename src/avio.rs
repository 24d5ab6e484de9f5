//! Pull-source adapter between the encoded frame queue and FFmpeg's
//! custom-IO read contract. The demuxer calls `read_encoded` from inside
//! its own call stacks expecting a blocking "fill this buffer" read, so
//! the wait loop uses a short cooperative sleep instead of a blocking
//! primitive. FFmpeg guarantees a single `AVIOContext` is never read from
//! two threads at once.

use std::os::raw::{c_int, c_void};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_next::ffi;

use crate::queue::PacketQueue;

/// IO chunk size handed to the demuxer per read.
pub(crate) const IO_CHUNK_SIZE: usize = 2560;

const DATA_POLL: Duration = Duration::from_millis(1);

/// Blocking read endpoint over the encoded frame queue. One frame is
/// popped per pull; a frame larger than the requested chunk is carried
/// over and its remainder served first on subsequent pulls, so no bytes
/// are lost or duplicated across the chunk boundary.
pub(crate) struct PullSource {
    queue: Arc<PacketQueue>,
    pending: Bytes,
}

impl PullSource {
    pub(crate) fn new(queue: Arc<PacketQueue>) -> Self {
        Self {
            queue,
            pending: Bytes::new(),
        }
    }

    /// Fills `buf` with the next run of encoded bytes, sleeping until the
    /// queue has data. Returns the byte count written, or `AVERROR_EOF`
    /// as soon as terminate is observed.
    pub(crate) fn fill(&mut self, buf: &mut [u8]) -> c_int {
        if buf.is_empty() {
            return 0;
        }

        let chunk = if self.pending.is_empty() {
            loop {
                if self.queue.is_terminated() {
                    return ffi::AVERROR_EOF;
                }
                match self.queue.pop_front() {
                    Some(chunk) => break chunk,
                    None => thread::sleep(DATA_POLL),
                }
            }
        } else {
            if self.queue.is_terminated() {
                return ffi::AVERROR_EOF;
            }
            std::mem::take(&mut self.pending)
        };

        let count = chunk.len().min(buf.len());
        buf[..count].copy_from_slice(&chunk[..count]);
        if count < chunk.len() {
            self.pending = chunk.slice(count..);
        }
        count as c_int
    }
}

unsafe extern "C" fn read_encoded(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if buf.is_null() || buf_size <= 0 {
        return ffi::AVERROR_EOF;
    }
    let source = unsafe { &mut *opaque.cast::<PullSource>() };
    let out = unsafe { std::slice::from_raw_parts_mut(buf, buf_size as usize) };
    source.fill(out)
}

/// Owns the `AVIOContext`, its IO buffer, and the boxed `PullSource`
/// behind the opaque pointer. Must outlive the format context it is
/// attached to; the format context never frees a caller-supplied pb.
pub(crate) struct AvioReader {
    ctx: *mut ffi::AVIOContext,
    source: *mut PullSource,
}

impl AvioReader {
    pub(crate) fn new(queue: Arc<PacketQueue>) -> anyhow::Result<Self> {
        let buffer = unsafe { ffi::av_malloc(IO_CHUNK_SIZE) };
        if buffer.is_null() {
            anyhow::bail!("av_malloc failed for the IO buffer");
        }
        let source = Box::into_raw(Box::new(PullSource::new(queue)));
        let ctx = unsafe {
            ffi::avio_alloc_context(
                buffer.cast(),
                IO_CHUNK_SIZE as c_int,
                0,
                source.cast(),
                Some(read_encoded),
                None,
                None,
            )
        };
        if ctx.is_null() {
            let mut buffer = buffer;
            unsafe {
                ffi::av_freep((&raw mut buffer).cast());
                drop(Box::from_raw(source));
            }
            anyhow::bail!("avio_alloc_context failed");
        }
        Ok(Self { ctx, source })
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut ffi::AVIOContext {
        self.ctx
    }
}

impl Drop for AvioReader {
    fn drop(&mut self) {
        unsafe {
            // The demuxer may have replaced the internal buffer; free
            // whatever the context currently holds, then the context.
            ffi::av_freep((&raw mut (*self.ctx).buffer).cast());
            ffi::avio_context_free(&mut self.ctx);
            drop(Box::from_raw(self.source));
        }
    }
}

// Owned exclusively by the decode worker once constructed; the raw
// pointers are never shared across threads.
unsafe impl Send for AvioReader {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DEFAULT_QUEUE_CAPACITY;
    use std::time::Instant;

    fn source() -> (Arc<PacketQueue>, PullSource) {
        let queue = Arc::new(PacketQueue::new(DEFAULT_QUEUE_CAPACITY));
        let source = PullSource::new(Arc::clone(&queue));
        (queue, source)
    }

    #[test]
    fn fill_preserves_feed_order() {
        let (queue, mut source) = source();
        queue.push(Bytes::from_static(b"first"));
        queue.push(Bytes::from_static(b"second"));

        let mut buf = [0u8; 16];
        let n = source.fill(&mut buf);
        assert_eq!(&buf[..n as usize], b"first");
        let n = source.fill(&mut buf);
        assert_eq!(&buf[..n as usize], b"second");
    }

    #[test]
    fn fill_carries_over_oversized_frames() {
        let (queue, mut source) = source();
        let payload: Vec<u8> = (0..(2 * IO_CHUNK_SIZE)).map(|i| i as u8).collect();
        queue.push(Bytes::from(payload.clone()));

        let mut buf = vec![0u8; IO_CHUNK_SIZE];
        let n = source.fill(&mut buf);
        assert_eq!(n as usize, IO_CHUNK_SIZE);
        assert_eq!(&buf[..], &payload[..IO_CHUNK_SIZE]);

        // remainder arrives on the next pull, no gap and no duplication
        let n = source.fill(&mut buf);
        assert_eq!(n as usize, IO_CHUNK_SIZE);
        assert_eq!(&buf[..], &payload[IO_CHUNK_SIZE..]);
    }

    #[test]
    fn fill_returns_eof_on_terminate() {
        let (queue, mut source) = source();
        queue.request_terminate();

        let mut buf = [0u8; 8];
        assert_eq!(source.fill(&mut buf), ffi::AVERROR_EOF);
    }

    #[test]
    fn fill_prefers_eof_over_pending_remainder() {
        let (queue, mut source) = source();
        queue.push(Bytes::from(vec![7u8; IO_CHUNK_SIZE + 4]));

        let mut buf = vec![0u8; IO_CHUNK_SIZE];
        assert_eq!(source.fill(&mut buf) as usize, IO_CHUNK_SIZE);

        queue.request_terminate();
        assert_eq!(source.fill(&mut buf), ffi::AVERROR_EOF);
    }

    #[test]
    fn fill_waits_for_data() {
        let (queue, mut source) = source();
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.push(Bytes::from_static(b"late"));
            })
        };

        let start = Instant::now();
        let mut buf = [0u8; 8];
        let n = source.fill(&mut buf);
        producer.join().unwrap();

        assert_eq!(&buf[..n as usize], b"late");
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
