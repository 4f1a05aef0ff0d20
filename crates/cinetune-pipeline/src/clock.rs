//! The shared presentation clock.
//!
//! Audio is the reference: the audio output periodically publishes a
//! snapshot of what is audible right now; the video side extrapolates the
//! live presentation time from the latest snapshot plus elapsed wall time.
//! The live time is always recomputed, never stored.

use std::time::{Duration, Instant};

/// One published observation of the audio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSnapshot {
    /// PTS of the sample leaving the speaker when the snapshot was taken.
    pub audible_pts_us: i64,
    pub taken_at: Instant,
}

impl SyncSnapshot {
    pub fn live_pts_us(&self, now: Instant) -> i64 {
        let elapsed = now.saturating_duration_since(self.taken_at);
        self.audible_pts_us + elapsed.as_micros() as i64
    }
}

#[derive(Debug, Default)]
pub struct PresentationClock {
    snapshot: Option<SyncSnapshot>,
}

impl PresentationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_reference(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn set_snapshot(&mut self, snapshot: SyncSnapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Seeds the clock from a displayed frame's own PTS (files with no
    /// audio stream).
    pub fn seed(&mut self, pts_us: i64, now: Instant) {
        self.snapshot = Some(SyncSnapshot {
            audible_pts_us: pts_us,
            taken_at: now,
        });
    }

    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    pub fn live_pts_us(&self, now: Instant) -> Option<i64> {
        Some(self.snapshot?.live_pts_us(now))
    }

    /// Time to wait before `frame_pts_us` is due; zero when it is late.
    pub fn delay_until(&self, frame_pts_us: i64, now: Instant) -> Option<Duration> {
        let live = self.live_pts_us(now)?;
        Some(Duration::from_micros((frame_pts_us - live).max(0) as u64))
    }
}
