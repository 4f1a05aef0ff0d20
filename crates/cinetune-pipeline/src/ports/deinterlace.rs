use cinetune_core::{DeinterlaceMode, VideoFrame};

/// Deinterlacing pixel math; stateful across fields.
pub trait DeinterlaceEngine: Send {
    fn process(&mut self, mode: DeinterlaceMode, frame: &mut VideoFrame);

    /// Clears field history (after a flush or mode change).
    fn reset(&mut self);
}
