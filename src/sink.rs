use crate::frame::OutputFrame;

/// Destination for decoded PCM frames. Called synchronously from the
/// decode worker thread, which is the only thread driving decode
/// progress, so implementations must not block indefinitely. No ownership
/// of the frame is retained after the call returns.
pub trait AudioSink: Send + Sync {
    fn on_decoded_frame(&self, frame: &OutputFrame<'_>);
}

/// Capability implemented by a consumer of encoded capture audio. Capture
/// backends deliver their non-PCM byte buffers through this interface and
/// stay unaware of the pipeline behind it. Safe to call from any thread,
/// at any time, including while the consumer is being toggled or reset.
pub trait EncodedAudioConsumer {
    fn on_encoded_audio(&self, data: &[u8]);
}
