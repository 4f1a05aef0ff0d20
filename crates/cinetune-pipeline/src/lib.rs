//! Media pipeline: demux -> decode -> output, as cooperating actors.
//!
//! Stages exchange move-only packet and frame events over mailboxes and
//! stay audio/video-synchronized through snapshots of the audio clock.
//! Device and codec work lives behind the port traits in [`ports`]; this
//! crate owns only the coordination logic.

pub mod audio_decoder;
pub mod audio_output;
pub mod clock;
pub mod config;
pub mod control;
pub mod deinterlacer;
pub mod demuxer;
mod event_hub;
pub mod messages;
pub mod player;
pub mod pool;
pub mod ports;
pub mod video_decoder;
pub mod video_output;

pub use config::PipelineConfig;
pub use player::{start_player, PlayerHandle, PlayerPorts};
