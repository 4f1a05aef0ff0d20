pub mod error;
pub mod media;
pub mod protocol;
pub mod state;

pub use error::PipelineError;
pub use media::{
    AudioFrame, FileInfo, Packet, StreamKind, VideoFrame, VideoSize, MICROS_PER_SEC,
};
pub use protocol::{ControlCommand, DeinterlaceMode, Notification};
pub use state::{PlaybackState, StageState};
