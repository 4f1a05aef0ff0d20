//! Commands and notifications crossing the control/GUI boundary.
//!
//! Serde-tagged so a GUI or remote frontend can carry them over any wire
//! without per-message registration code.

use serde::{Deserialize, Serialize};

use crate::media::{FileInfo, VideoSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeinterlaceMode {
    Off,
    Weave,
    Bob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    OpenFile { path: String },
    CloseFile,
    Play,
    Pause,
    SeekAbsolute { position_us: i64 },
    SeekRelative { delta_us: i64 },
    SetVolume { linear: f64 },
    SelectDeinterlacer { mode: DeinterlaceMode },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    FileOpened { info: FileInfo },
    FileOpenFailed { message: String },
    FileClosed,
    NoAudioStream,
    CurrentTime { position_us: i64 },
    Duration { duration_us: i64 },
    VideoSize { size: VideoSize },
    Clipping { peak: f32 },
    EndOfStream,
    Error { message: String },
}
