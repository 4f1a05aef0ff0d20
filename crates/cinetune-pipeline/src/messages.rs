//! Events exchanged between pipeline stages.
//!
//! Packet and frame events are move-only: the payload (or pool lease)
//! travels with the event and has exactly one owner at a time. Control and
//! notification events are cheap values; the shutdown fan-out carries its
//! reason behind an `Arc` since every actor legitimately receives it.

use std::sync::Arc;
use std::time::Instant;

use cinetune_core::{ControlCommand, DeinterlaceMode, FileInfo, Packet, StreamKind};
use cinetune_runtime::actor::{Actor, ActorRef, Event};

use crate::clock::SyncSnapshot;
use crate::pool::FrameLease;

macro_rules! notify_events {
    ($($ty:ty),+ $(,)?) => {
        $(impl Event for $ty {
            type Response = ();
        })+
    };
}

/// Wires a back-edge of the actor graph after both ends exist.
pub struct Attach<A: Actor>(pub ActorRef<A>);

impl<A: Actor> Event for Attach<A> {
    type Response = ();
}

// ---- control actor ----

pub struct CommandMsg(pub ControlCommand);

/// Playback position report from the clock-leading output stage.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInd {
    pub kind: StreamKind,
    pub pts_us: i64,
}

pub struct FileOpenedInd {
    pub info: FileInfo,
}

pub struct FileClosedInd;

// ---- demuxer ----

pub struct OpenFileReq {
    pub path: String,
}

pub struct CloseFileReq;

pub struct SeekAbsoluteReq {
    pub position_us: i64,
}

pub struct StreamOpened {
    pub kind: StreamKind,
}

pub struct StreamOpenFailed {
    pub kind: StreamKind,
    pub message: String,
}

pub struct StreamClosed {
    pub kind: StreamKind,
}

/// Backpressure credit: one packet fully absorbed downstream.
///
/// Tagged with the flush epoch it was earned under so a credit raced
/// against a seek is discarded instead of corrupting the counters.
#[derive(Debug, Clone, Copy)]
pub struct PacketConsumed {
    pub kind: StreamKind,
    pub epoch: u64,
}

/// An output stage finished presenting everything up to end of stream.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackDrained {
    pub kind: StreamKind,
}

/// A stage hit a fatal resource failure; the demuxer closes the file.
pub struct StageFailedInd {
    pub kind: StreamKind,
    pub message: String,
}

// ---- decoder stages ----

pub struct OpenStreamReq {
    pub epoch: u64,
    /// Whether an audio stream exists in the same file (the video side
    /// seeds its own clock when it does not).
    pub sibling_audio: bool,
}

pub struct CloseStreamReq;

pub struct PacketMsg(pub Packet);

/// Discard in-flight work after a seek; starts a new flush epoch.
#[derive(Debug, Clone, Copy)]
pub struct FlushReq {
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EndOfStreamInd;

pub struct SelectDeinterlacerReq {
    pub mode: DeinterlaceMode,
}

pub struct SetDeinterlaceModeReq {
    pub mode: DeinterlaceMode,
}

// ---- output stages ----

pub struct OutputOpenReq {
    pub epoch: u64,
    pub sibling_audio: bool,
}

/// Close request travelling with the decoder's unused leases, so the pool
/// can reclaim them.
pub struct OutputCloseReq<T> {
    pub leases: Vec<FrameLease<T>>,
}

pub struct OutputOpened<T> {
    pub leases: Vec<FrameLease<T>>,
}

pub struct OutputOpenFailed {
    pub message: String,
}

pub struct OutputClosed;

/// A filled pool buffer moving downstream.
pub struct DecodedFrame<T> {
    pub lease: FrameLease<T>,
}

/// An emptied pool buffer moving back to the decoder.
pub struct FrameReturned<T> {
    pub lease: FrameLease<T>,
}

#[derive(Debug, Clone, Copy)]
pub struct RefillTick;

#[derive(Debug, Clone, Copy)]
pub struct ShowNextFrame;

/// Audio clock observation for the video scheduler.
#[derive(Debug, Clone, Copy)]
pub struct AudioSyncInfo(pub SyncSnapshot);

impl AudioSyncInfo {
    pub fn new(audible_pts_us: i64, taken_at: Instant) -> Self {
        Self(SyncSnapshot {
            audible_pts_us,
            taken_at,
        })
    }
}

/// The audio side finished flushing the given epoch; re-enables snapshot
/// intake. Emitted exactly once per flush epoch.
#[derive(Debug, Clone, Copy)]
pub struct AudioFlushedInd {
    pub epoch: u64,
}

pub struct PlayReq;

pub struct PauseReq;

pub struct SetVolumeReq {
    pub linear: f64,
}

/// Cooperative shutdown, fanned out to every actor.
#[derive(Clone)]
pub struct ShutdownReq {
    pub reason: Arc<str>,
}

impl ShutdownReq {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Arc::from(reason.into().into_boxed_str()),
        }
    }
}

notify_events!(
    CommandMsg,
    ProgressInd,
    FileOpenedInd,
    FileClosedInd,
    OpenFileReq,
    CloseFileReq,
    SeekAbsoluteReq,
    StreamOpened,
    StreamOpenFailed,
    StreamClosed,
    PacketConsumed,
    PlaybackDrained,
    StageFailedInd,
    OpenStreamReq,
    CloseStreamReq,
    PacketMsg,
    FlushReq,
    EndOfStreamInd,
    SelectDeinterlacerReq,
    SetDeinterlaceModeReq,
    OutputOpenReq,
    OutputOpenFailed,
    OutputClosed,
    RefillTick,
    ShowNextFrame,
    AudioSyncInfo,
    AudioFlushedInd,
    PlayReq,
    PauseReq,
    SetVolumeReq,
    ShutdownReq,
);

impl<T: Send + 'static> Event for OutputCloseReq<T> {
    type Response = ();
}

impl<T: Send + 'static> Event for OutputOpened<T> {
    type Response = ();
}

impl<T: Send + 'static> Event for DecodedFrame<T> {
    type Response = ();
}

impl<T: Send + 'static> Event for FrameReturned<T> {
    type Response = ();
}
