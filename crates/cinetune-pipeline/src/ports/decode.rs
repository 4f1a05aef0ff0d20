use thiserror::Error;

use cinetune_core::{AudioFrame, Packet, PipelineError, VideoFrame};

/// Non-fatal decode failure; the offending packet is dropped and the
/// stream continues.
#[derive(Debug, Clone, Error)]
#[error("decode failed: {0}")]
pub struct DecodeError(pub String);

/// Codec engine for the audio elementary stream.
///
/// `decode` fills the pooled frame in place and returns whether a frame
/// was produced (zero-or-one frame per packet).
pub trait AudioDecodeEngine: Send {
    fn open(&mut self) -> Result<(), PipelineError>;

    fn decode(&mut self, packet: &Packet, out: &mut AudioFrame) -> Result<bool, DecodeError>;

    /// Drops internal codec state after a flush; pooled buffers are not
    /// touched.
    fn reset(&mut self);

    fn close(&mut self);
}

pub trait VideoDecodeEngine: Send {
    fn open(&mut self) -> Result<(), PipelineError>;

    fn decode(&mut self, packet: &Packet, out: &mut VideoFrame) -> Result<bool, DecodeError>;

    fn reset(&mut self);

    fn close(&mut self);
}
