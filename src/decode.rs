//! Decode worker. Owns the demuxer and decoder for one worker lifetime
//! and advances through open, probe and decode against the pull-source
//! adapter. The passthrough transport framing is known ahead of time, so
//! the input is opened with a fixed "spdif" demuxer hint instead of
//! format auto-probing, which mis-detects on the few bytes available at
//! startup.

use std::ptr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ffmpeg_next::ffi;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::media;

use crate::avio::AvioReader;
use crate::frame::{TimestampPolicy, Timestamps, output_frame};
use crate::queue::PacketQueue;
use crate::sink::AudioSink;

/// Demuxer hint for the IEC 61937 passthrough transport.
const INPUT_FORMAT: &str = "spdif";

/// Stream-format analysis budget handed to the demuxer, in AV_TIME_BASE
/// (microsecond) units.
const PROBE_BUDGET: i64 = 2 * ffi::AV_TIME_BASE as i64;

/// Poll period while disabled or parked.
const IDLE_POLL: Duration = Duration::from_millis(2);

fn find_input_format(name: &str) -> anyhow::Result<*const ffi::AVInputFormat> {
    let cname = std::ffi::CString::new(name)
        .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
    let ptr = unsafe { ffi::av_find_input_format(cname.as_ptr()) };
    if ptr.is_null() {
        return Err(anyhow::anyhow!("input format not found: {}", name));
    }
    Ok(ptr)
}

/// Allocated format context with the pull-source attached, not yet
/// opened. `avformat_open_input` takes ownership of the pointer on both
/// success and failure.
struct PendingFormat(*mut ffi::AVFormatContext);

impl PendingFormat {
    fn new(io: &mut AvioReader) -> anyhow::Result<Self> {
        let ctx = unsafe { ffi::avformat_alloc_context() };
        if ctx.is_null() {
            anyhow::bail!("avformat_alloc_context failed");
        }
        unsafe {
            (*ctx).pb = io.as_mut_ptr();
            (*ctx).max_analyze_duration = PROBE_BUDGET;
        }
        Ok(Self(ctx))
    }

    fn into_raw(self) -> *mut ffi::AVFormatContext {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for PendingFormat {
    fn drop(&mut self) {
        unsafe {
            // pb belongs to the AvioReader, detach it before freeing
            (*self.0).pb = ptr::null_mut();
            ffi::avformat_free_context(self.0);
        }
    }
}

enum FormatState {
    Pending(PendingFormat),
    Open(Input),
    /// Freed by FFmpeg on a failed open; re-allocated on the next pass.
    Gone,
}

/// Demuxer, decoder and the single reusable decoded-frame buffer.
/// Exclusively owned by the worker thread; created on construction and
/// reset, dropped when the worker exits. Field order keeps the format
/// context dropping before the AVIO context it borrows.
pub(crate) struct DecoderContext {
    queue: Arc<PacketQueue>,
    format: FormatState,
    decoder: Option<ffmpeg_next::codec::decoder::Audio>,
    frame: ffmpeg_next::frame::Audio,
    io: AvioReader,
    probe_failed: bool,
}

// The raw format and IO pointers are never shared; the whole context
// moves into the worker thread and stays there.
unsafe impl Send for DecoderContext {}

impl DecoderContext {
    pub(crate) fn new(queue: Arc<PacketQueue>) -> anyhow::Result<Self> {
        let mut io = AvioReader::new(Arc::clone(&queue))?;
        let format = FormatState::Pending(PendingFormat::new(&mut io)?);
        Ok(Self {
            queue,
            format,
            decoder: None,
            frame: ffmpeg_next::frame::Audio::empty(),
            io,
            probe_failed: false,
        })
    }

    fn is_open(&self) -> bool {
        matches!(self.format, FormatState::Open(_))
    }

    /// One open attempt. Blocks inside the pull source until data (or
    /// terminate) arrives, so the surrounding loop needs no extra pacing.
    fn open_input(&mut self) -> anyhow::Result<()> {
        if matches!(self.format, FormatState::Gone) {
            self.format = FormatState::Pending(PendingFormat::new(&mut self.io)?);
        }

        let hint = find_input_format(INPUT_FORMAT)?;
        let pending = match std::mem::replace(&mut self.format, FormatState::Gone) {
            FormatState::Pending(pending) => pending,
            open => {
                self.format = open;
                return Ok(());
            }
        };

        let mut ctx = pending.into_raw();
        let ret =
            unsafe { ffi::avformat_open_input(&mut ctx, ptr::null(), hint, ptr::null_mut()) };
        if ret < 0 {
            // FFmpeg freed the context and nulled the pointer
            return Err(anyhow::anyhow!(
                "avformat_open_input: {}",
                ffmpeg_next::Error::from(ret)
            ));
        }

        self.format = FormatState::Open(unsafe { Input::wrap(ctx) });
        self.queue.set_stream_opened(true);
        log::info!("passthrough input opened ({})", INPUT_FORMAT);
        Ok(())
    }

    /// Locates the best audio elementary stream and instantiates its
    /// decoder. Attempted once per successful open; a failure parks the
    /// worker until an external reset.
    fn probe_stream(&mut self) -> anyhow::Result<()> {
        let FormatState::Open(input) = &mut self.format else {
            anyhow::bail!("probe without an open input");
        };

        let ret =
            unsafe { ffi::avformat_find_stream_info(input.as_mut_ptr(), ptr::null_mut()) };
        if ret < 0 {
            return Err(anyhow::anyhow!(
                "avformat_find_stream_info: {}",
                ffmpeg_next::Error::from(ret)
            ));
        }

        let (index, parameters) = {
            let stream = input
                .streams()
                .best(media::Type::Audio)
                .ok_or_else(|| anyhow::anyhow!("no audio stream found"))?;
            (stream.index(), stream.parameters())
        };

        let mut codec_ctx = ffmpeg_next::codec::Context::new();
        codec_ctx.set_parameters(parameters)?;
        let decoder = codec_ctx.decoder().audio()?;
        log::info!(
            "audio stream {}: {} ch @ {} Hz",
            index,
            decoder.channels(),
            decoder.rate()
        );

        // drop packets buffered during analysis so decode starts at the
        // live edge
        unsafe {
            ffi::avformat_flush(input.as_mut_ptr());
        }

        self.decoder = Some(decoder);
        self.queue.set_stream_detected(true);
        Ok(())
    }

    /// Reads one container packet, feeds the decoder and drains every
    /// decoded frame to the sink. Transient errors are logged and the
    /// packet skipped; end-of-stream surfaces only once terminate is set.
    fn decode_step(&mut self, sink: &dyn AudioSink, timestamps: &mut Timestamps) {
        let FormatState::Open(input) = &mut self.format else {
            return;
        };
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        let mut packet = ffmpeg_next::Packet::empty();
        if let Err(e) = packet.read(input) {
            if !self.queue.is_terminated() {
                log::error!("read packet: {}", e);
            }
            return;
        }

        if let Err(e) = decoder.send_packet(&packet) {
            log::error!("send packet: {}", e);
            return;
        }

        loop {
            match decoder.receive_frame(&mut self.frame) {
                Ok(()) => {
                    let timestamp = timestamps.stamp(self.frame.samples(), self.frame.rate());
                    let frame = output_frame(&self.frame, timestamp);
                    sink.on_decoded_frame(&frame);
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(e) => {
                    log::error!("receive frame: {}", e);
                    break;
                }
            }
        }
    }
}

/// Worker thread body. Terminate is absorbing from every state; disabling
/// idles the loop without touching the open demuxer or decoder.
pub(crate) fn run(mut ctx: DecoderContext, sink: Arc<dyn AudioSink>, policy: TimestampPolicy) {
    let mut timestamps = Timestamps::new(policy);

    loop {
        if ctx.queue.is_terminated() {
            break;
        }

        if !ctx.queue.is_enabled() {
            thread::sleep(IDLE_POLL);
            continue;
        }

        if !ctx.is_open() {
            if let Err(e) = ctx.open_input() {
                if !ctx.queue.is_terminated() {
                    log::warn!("open input: {:#}", e);
                    // one open attempt per loop pass, not a tight spin
                    thread::sleep(IDLE_POLL);
                }
                continue;
            }
        }

        if ctx.decoder.is_none() {
            if ctx.probe_failed {
                thread::sleep(IDLE_POLL);
                continue;
            }
            if let Err(e) = ctx.probe_stream() {
                if !ctx.queue.is_terminated() {
                    log::error!("stream probe failed, waiting for reset: {:#}", e);
                    ctx.probe_failed = true;
                }
                continue;
            }
        }

        ctx.decode_step(sink.as_ref(), &mut timestamps);
    }

    log::info!("decode worker exiting");
}
