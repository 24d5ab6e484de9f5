//! Lifecycle controller for the decode pipeline: construction,
//! enable/disable, reset and teardown. The capture collaborator feeds
//! encoded buffers from its own thread; one worker thread owns the whole
//! demux/decode state machine. Cancellation is cooperative and teardown
//! joins the worker, so no threads or decoder handles outlive the
//! pipeline.

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;

use crate::decode::{self, DecoderContext};
use crate::frame::TimestampPolicy;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, PacketQueue};
use crate::runtime::{self, RuntimeGuard};
use crate::sink::{AudioSink, EncodedAudioConsumer};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub timestamp_policy: TimestampPolicy,
    /// Encoded frames buffered before the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timestamp_policy: TimestampPolicy::default_for_platform(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

pub struct AudioDecodePipeline {
    queue: Arc<PacketQueue>,
    sink: Arc<dyn AudioSink>,
    config: PipelineConfig,
    worker: Option<JoinHandle<()>>,
    _runtime: RuntimeGuard,
}

impl AudioDecodePipeline {
    /// Wires a decode worker to `sink` and starts the worker thread.
    /// Construction failure is fatal; the pipeline must not be used after
    /// an error here.
    pub fn new(sink: Arc<dyn AudioSink>) -> anyhow::Result<Self> {
        Self::with_config(sink, PipelineConfig::default())
    }

    pub fn with_config(sink: Arc<dyn AudioSink>, config: PipelineConfig) -> anyhow::Result<Self> {
        let runtime = runtime::acquire()?;
        let queue = Arc::new(PacketQueue::new(config.queue_capacity));
        let worker = Self::spawn_worker(
            Arc::clone(&queue),
            Arc::clone(&sink),
            config.timestamp_policy,
        )?;
        Ok(Self {
            queue,
            sink,
            config,
            worker: Some(worker),
            _runtime: runtime,
        })
    }

    fn spawn_worker(
        queue: Arc<PacketQueue>,
        sink: Arc<dyn AudioSink>,
        policy: TimestampPolicy,
    ) -> anyhow::Result<JoinHandle<()>> {
        let ctx = DecoderContext::new(Arc::clone(&queue))?;
        std::thread::Builder::new()
            .name("passthrough-decode".into())
            .spawn(move || decode::run(ctx, sink, policy))
            .map_err(|e| anyhow::anyhow!("failed to spawn decode worker: {}", e))
    }

    /// Producer-facing entry point; safe from any thread, concurrently
    /// with enable/disable/reset. Empty buffers are rejected and data is
    /// silently dropped while disabled.
    pub fn feed(&self, data: &[u8]) {
        if data.is_empty() {
            log::warn!("feed: dropping empty buffer");
            return;
        }
        if !self.queue.is_enabled() {
            return;
        }
        self.queue.push(Bytes::copy_from_slice(data));
    }

    /// Every transition also discards buffered encoded frames; stale
    /// audio must never be decoded after a gap.
    pub fn set_enabled(&self, enabled: bool) {
        if self.queue.set_enabled(enabled) {
            log::info!("decode {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_enabled()
    }

    /// True once the probe step has produced a decoder.
    pub fn decoder_ready(&self) -> bool {
        self.queue.stream_detected()
    }

    /// Stops the worker, discards all decoder, demuxer and queue state,
    /// then starts a fresh worker at the open step. Blocks until the old
    /// thread has fully exited.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        log::info!("reset: stopping decode worker");
        self.stop_worker();
        self.queue.reset_control();
        self.queue.clear_terminate();
        self.worker = Some(Self::spawn_worker(
            Arc::clone(&self.queue),
            Arc::clone(&self.sink),
            self.config.timestamp_policy,
        )?);
        log::info!("reset: decode worker restarted");
        Ok(())
    }

    /// Terminates and joins the worker and frees all pipeline state.
    /// Safe to call repeatedly, and safe even if the worker never opened
    /// a stream. Subsequent `feed` calls are dropped.
    pub fn shutdown(&mut self) {
        self.stop_worker();
        self.queue.reset_control();
    }

    fn stop_worker(&mut self) {
        self.queue.request_terminate();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decode worker panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_frames(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for AudioDecodePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EncodedAudioConsumer for AudioDecodePipeline {
    fn on_encoded_audio(&self, data: &[u8]) {
        self.feed(data);
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
