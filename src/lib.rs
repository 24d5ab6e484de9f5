//! Streaming decode pipeline for compressed (bitstream-passthrough)
//! capture audio.
//!
//! A capture backend pushes opaque encoded byte buffers from its own
//! thread through [`EncodedAudioConsumer::on_encoded_audio`]; a dedicated
//! worker thread pulls them through an FFmpeg demuxer and decoder via a
//! blocking custom-IO adapter and hands finished PCM frames to an
//! [`AudioSink`]. The pipeline survives enable/disable toggling and
//! supports a synchronous full reset without leaking threads, buffers or
//! decoder state.

mod avio;
mod decode;
mod queue;

pub mod frame;
pub mod pipeline;
pub mod runtime;
pub mod sink;

pub use frame::{ChannelLayout, OutputFrame, SampleFormat, TimestampPolicy};
pub use pipeline::{AudioDecodePipeline, PipelineConfig};
pub use runtime::{RuntimeGuard, acquire};
pub use sink::{AudioSink, EncodedAudioConsumer};

/// Registers FFmpeg components. [`runtime::acquire`] runs this on first
/// use; call it directly only when the host wants global init up front.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}
