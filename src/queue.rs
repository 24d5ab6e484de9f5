use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Inner {
    packets: VecDeque<Bytes>,
    enabled: bool,
    terminate: bool,
    stream_opened: bool,
    stream_detected: bool,
    overflowed: bool,
}

/// FIFO of encoded frames plus the control flags shared between the
/// producer and the decode worker. One mutex guards all of it; the lock
/// is held only for the short push/pop/flag critical sections, never
/// across a blocking wait or a decode call.
pub(crate) struct PacketQueue {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl PacketQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                enabled: true,
                terminate: false,
                stream_opened: false,
                stream_detected: false,
                overflowed: false,
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking enqueue. Ignored once terminate is set (nothing will
    /// ever drain the queue again). When full, the oldest frame is dropped
    /// so the freshest live audio survives a worker stall; an overflow
    /// episode logs a single warning.
    pub(crate) fn push(&self, data: Bytes) {
        let mut inner = self.lock();
        if inner.terminate {
            return;
        }
        if inner.packets.len() >= self.capacity {
            if !inner.overflowed {
                inner.overflowed = true;
                log::warn!(
                    "encoded frame queue full ({} frames), dropping oldest",
                    self.capacity
                );
            }
            inner.packets.pop_front();
        }
        inner.packets.push_back(data);
    }

    /// Non-blocking single pop; `None` when empty.
    pub(crate) fn pop_front(&self) -> Option<Bytes> {
        let mut inner = self.lock();
        let popped = inner.packets.pop_front();
        if inner.packets.is_empty() {
            inner.overflowed = false;
        }
        popped
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.lock();
        inner.packets.clear();
        inner.overflowed = false;
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().packets.len()
    }

    /// Toggles the enabled flag. Every transition clears the buffered
    /// frames under the same lock acquisition, so a toggle can never race
    /// a concurrent push into letting stale audio through. Returns whether
    /// the flag actually changed.
    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let mut inner = self.lock();
        if inner.enabled == enabled {
            return false;
        }
        inner.packets.clear();
        inner.overflowed = false;
        inner.enabled = enabled;
        true
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub(crate) fn request_terminate(&self) {
        self.lock().terminate = true;
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lock().terminate
    }

    pub(crate) fn set_stream_opened(&self, opened: bool) {
        self.lock().stream_opened = opened;
    }

    pub(crate) fn stream_opened(&self) -> bool {
        self.lock().stream_opened
    }

    pub(crate) fn set_stream_detected(&self, detected: bool) {
        self.lock().stream_detected = detected;
    }

    pub(crate) fn stream_detected(&self) -> bool {
        self.lock().stream_detected
    }

    /// Discards buffered frames and progress flags. Terminate is left
    /// untouched; `clear_terminate` re-arms the queue for a restarted
    /// worker.
    pub(crate) fn reset_control(&self) {
        let mut inner = self.lock();
        inner.packets.clear();
        inner.overflowed = false;
        inner.stream_opened = false;
        inner.stream_detected = false;
    }

    pub(crate) fn clear_terminate(&self) {
        self.lock().terminate = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(byte: u8, len: usize) -> Bytes {
        Bytes::from(vec![byte; len])
    }

    #[test]
    fn pops_in_feed_order() {
        let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
        queue.push(frame(1, 8));
        queue.push(frame(2, 8));
        queue.push(frame(3, 8));

        assert_eq!(queue.pop_front().unwrap()[0], 1);
        assert_eq!(queue.pop_front().unwrap()[0], 2);
        assert_eq!(queue.pop_front().unwrap()[0], 3);
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = PacketQueue::new(4);
        for byte in 0..6u8 {
            queue.push(frame(byte, 4));
        }

        assert_eq!(queue.len(), 4);
        for expected in 2..6u8 {
            assert_eq!(queue.pop_front().unwrap()[0], expected);
        }
    }

    #[test]
    fn push_after_terminate_is_dropped() {
        let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
        queue.request_terminate();
        queue.push(frame(1, 8));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn enable_transitions_clear_buffered_frames() {
        let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
        queue.push(frame(1, 8));

        assert!(queue.set_enabled(false));
        assert_eq!(queue.len(), 0);

        // no transition, nothing to clear
        assert!(!queue.set_enabled(false));

        queue.push(frame(2, 8));
        assert!(queue.set_enabled(true));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn clear_discards_everything_buffered() {
        let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
        queue.push(frame(1, 8));
        queue.push(frame(2, 8));
        queue.clear();
        assert_eq!(queue.len(), 0);
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn reset_control_keeps_terminate() {
        let queue = PacketQueue::new(DEFAULT_QUEUE_CAPACITY);
        queue.push(frame(1, 8));
        queue.set_stream_opened(true);
        queue.set_stream_detected(true);
        queue.request_terminate();

        queue.reset_control();
        assert_eq!(queue.len(), 0);
        assert!(!queue.stream_opened());
        assert!(!queue.stream_detected());
        assert!(queue.is_terminated());

        queue.clear_terminate();
        assert!(!queue.is_terminated());
    }
}
