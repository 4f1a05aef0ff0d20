use std::time::Duration;

/// Packets a stage may have outstanding with its decoder before the demux
/// read loop stops issuing reads for that stream.
pub(crate) const AUDIO_PACKET_TARGET: usize = 8;
pub(crate) const VIDEO_PACKET_TARGET: usize = 8;

/// Decoded-frame buffers per output stage. Fixed for the life of an open
/// file; the hot path never allocates frames.
pub(crate) const FRAME_POOL_SLOTS: usize = 10;

/// Audio hardware-buffer refill cadence. Each tick also publishes one
/// audio-clock snapshot to the video side.
pub(crate) const REFILL_TICK: Duration = Duration::from_millis(20);

/// Minimum spacing of `CurrentTime` notifications to the control layer.
pub(crate) const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Packets pulled from the container per read burst before the demuxer
/// drains its own mailbox again.
pub(crate) const READ_BURST_PACKETS: usize = 4;

/// Minimum spacing of `Clipping` notifications.
pub(crate) const CLIP_NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub audio_packet_target: usize,
    pub video_packet_target: usize,
    pub frame_pool_slots: usize,
    pub refill_tick: Duration,
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_packet_target: AUDIO_PACKET_TARGET,
            video_packet_target: VIDEO_PACKET_TARGET,
            frame_pool_slots: FRAME_POOL_SLOTS,
            refill_tick: REFILL_TICK,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}
