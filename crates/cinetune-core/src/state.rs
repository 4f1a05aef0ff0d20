use serde::{Deserialize, Serialize};

/// Lifecycle of the system stream, each elementary stream, and each
/// decoder/output stage. Mutated only by the owning actor's handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Closed,
    Opening,
    Opened,
    Closing,
}

impl StageState {
    /// True while an open/close transition is in flight.
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Opening | Self::Closing)
    }
}

/// Presentation-side state of an output stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Opened, holding frames, no presentation clock yet.
    Still,
    Playing,
    Paused,
    /// Transient state right after a flush, until new frames arrive.
    Flushed,
}
