//! Video output stage: schedules decoded frames against the audio clock.
//!
//! Each displayed frame arms a one-shot timer for the next frame's due
//! time, extrapolated from the latest audio snapshot. Snapshots published
//! between a flush and the audio side's flush acknowledgement belong to
//! the old position and are ignored; every flush epoch pairs exactly one
//! counter increment here with one acknowledgement from the audio side,
//! and the counter is signed because the acknowledgement may arrive
//! first. Files with no audio stream drive the clock from their own frame
//! PTS instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use cinetune_core::{Notification, PlaybackState, StageState, StreamKind, VideoFrame, VideoSize};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};
use cinetune_runtime::timer::{Schedule, Timer};

use crate::clock::PresentationClock;
use crate::config::PipelineConfig;
use crate::control::ControlActor;
use crate::event_hub::EventHub;
use crate::messages::{
    Attach, AudioFlushedInd, AudioSyncInfo, DecodedFrame, EndOfStreamInd, FlushReq, FrameReturned,
    OutputCloseReq, OutputClosed, OutputOpenReq, OutputOpened, PauseReq, PlayReq, PlaybackDrained,
    ProgressInd, ShowNextFrame, ShutdownReq,
};
use crate::pool::{FrameLease, FramePool, SlotStation};
use crate::ports::VideoSink;
use crate::video_decoder::VideoDecoderStage;

pub struct VideoOutput {
    sink: Box<dyn VideoSink>,
    decoder: Option<ActorRef<VideoDecoderStage>>,
    control: Option<ActorRef<ControlActor>>,
    events: Arc<EventHub>,
    cfg: PipelineConfig,

    stage: StageState,
    state: PlaybackState,
    pool: Option<FramePool<VideoFrame>>,
    queue: VecDeque<FrameLease<VideoFrame>>,
    /// The lease whose pixels are currently on screen. Survives a flush so
    /// the last frame stays visible until the seek target arrives.
    displayed: Option<FrameLease<VideoFrame>>,
    clock: PresentationClock,
    has_audio: bool,
    playing: bool,
    /// Flushes issued minus flush acknowledgements received from the audio
    /// side. Positive means incoming snapshots predate our flush.
    flush_ignore: i32,
    /// Flush epoch already processed; each epoch increments the counter at
    /// most once.
    last_flush_epoch: Option<u64>,
    eos_pending: bool,
    drained_sent: bool,
    schedule_timer: Option<Timer>,
    last_size: Option<VideoSize>,
    last_progress: Option<Instant>,
}

impl VideoOutput {
    pub fn new(sink: Box<dyn VideoSink>, events: Arc<EventHub>, cfg: PipelineConfig) -> Self {
        Self {
            sink,
            decoder: None,
            control: None,
            events,
            cfg,
            stage: StageState::Closed,
            state: PlaybackState::Idle,
            pool: None,
            queue: VecDeque::new(),
            displayed: None,
            clock: PresentationClock::new(),
            has_audio: false,
            playing: false,
            flush_ignore: 0,
            last_flush_epoch: None,
            eos_pending: false,
            drained_sent: false,
            schedule_timer: None,
            last_size: None,
            last_progress: None,
        }
    }

    fn return_lease(&mut self, lease: FrameLease<VideoFrame>) {
        if let Some(pool) = &mut self.pool {
            pool.note_station(&lease, SlotStation::Decoder);
        }
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(FrameReturned { lease });
        }
    }

    /// Pops and displays the head frame, recycling the frame it replaces.
    fn show_head(&mut self) {
        let Some(mut lease) = self.queue.pop_front() else {
            return;
        };
        let frame = std::mem::take(&mut lease.data);
        let pts_us = frame.pts_us;
        let size = frame.size;

        if self.last_size != Some(size) {
            self.last_size = Some(size);
            self.events.emit(Notification::VideoSize { size });
        }

        let returned = self.sink.show(frame);
        if let Some(mut prev) = self.displayed.take() {
            prev.data = returned.unwrap_or_default();
            self.return_lease(prev);
        }
        if let Some(pool) = &mut self.pool {
            pool.note_station(&lease, SlotStation::Sink);
        }
        // The pixels moved to the sink; keep the PTS so pause/resume can
        // re-seed the clock from what is on screen.
        lease.data.pts_us = pts_us;
        self.displayed = Some(lease);

        if !self.has_audio {
            if self.playing {
                // No audio reference: the shown frame's own PTS is the
                // clock.
                self.clock.seed(pts_us, Instant::now());
            }
            self.notify_progress(pts_us);
        }
    }

    fn notify_progress(&mut self, pts_us: i64) {
        let now = Instant::now();
        let due = self
            .last_progress
            .map_or(true, |t| now.duration_since(t) >= self.cfg.progress_interval);
        if due {
            self.last_progress = Some(now);
            if let Some(control) = &self.control {
                let _ = control.notify(ProgressInd {
                    kind: StreamKind::Video,
                    pts_us,
                });
            }
        }
    }

    /// Arms the timer for the head frame's due time, or reports drain when
    /// the stream has ended and nothing is left to show.
    fn schedule_next(&mut self) {
        if self.stage != StageState::Opened {
            return;
        }
        let Some(head) = self.queue.front() else {
            if self.eos_pending && !self.drained_sent {
                self.drained_sent = true;
                debug!("video drained");
                if let Some(decoder) = &self.decoder {
                    let _ = decoder.notify(PlaybackDrained {
                        kind: StreamKind::Video,
                    });
                }
            }
            return;
        };
        if !self.playing {
            return;
        }
        let Some(delay) = self.clock.delay_until(head.data.pts_us, Instant::now()) else {
            // No clock reference yet; the next snapshot reschedules.
            return;
        };
        if let Some(timer) = &self.schedule_timer {
            timer.arm(Schedule::Relative(delay));
        }
    }

    fn reclaim(&mut self, leases: Vec<FrameLease<VideoFrame>>) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        for lease in leases {
            if let Err(e) = pool.check_in(lease) {
                warn!(error = %e, "video buffer reclaim failed");
            }
        }
    }
}

impl Handler<Attach<VideoDecoderStage>> for VideoOutput {
    fn handle(&mut self, event: Attach<VideoDecoderStage>, _ctx: &mut ActorContext<Self>) {
        self.decoder = Some(event.0);
    }
}

impl Handler<Attach<ControlActor>> for VideoOutput {
    fn handle(&mut self, event: Attach<ControlActor>, _ctx: &mut ActorContext<Self>) {
        self.control = Some(event.0);
    }
}

impl Handler<OutputOpenReq> for VideoOutput {
    fn handle(&mut self, event: OutputOpenReq, ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Closed {
            warn!(stage = ?self.stage, "video output open ignored: not closed");
            return;
        }
        let mut pool = FramePool::new(self.cfg.frame_pool_slots);
        let leases = pool.checkout_all(SlotStation::Decoder);
        self.pool = Some(pool);
        self.stage = StageState::Opened;
        self.state = PlaybackState::Still;
        self.has_audio = event.sibling_audio;
        self.playing = false;
        self.flush_ignore = 0;
        self.last_flush_epoch = None;
        self.eos_pending = false;
        self.drained_sent = false;
        self.clock.clear();
        self.last_size = None;

        if self.schedule_timer.is_none() {
            match Timer::for_actor("cinetune-video-sched", ctx.actor_ref(), ShowNextFrame) {
                Ok(timer) => self.schedule_timer = Some(timer),
                Err(e) => {
                    warn!(error = %e, "video schedule timer spawn failed");
                    if let Some(decoder) = &self.decoder {
                        let _ = decoder.notify(crate::messages::OutputOpenFailed {
                            message: format!("schedule timer spawn failed: {e}"),
                        });
                    }
                    self.stage = StageState::Closed;
                    self.pool = None;
                    return;
                }
            }
        }

        debug!(buffers = self.cfg.frame_pool_slots, has_audio = self.has_audio, "video output opened");
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(OutputOpened { leases });
        }
    }
}

impl Handler<OutputCloseReq<VideoFrame>> for VideoOutput {
    fn handle(&mut self, event: OutputCloseReq<VideoFrame>, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            trace!(stage = ?self.stage, "video output close ignored");
            return;
        }
        if let Some(timer) = &self.schedule_timer {
            timer.disarm();
        }
        self.reclaim(event.leases);
        let queued: Vec<_> = self.queue.drain(..).collect();
        self.reclaim(queued);
        if let Some(displayed) = self.displayed.take() {
            self.reclaim(vec![displayed]);
        }
        if let Some(pool) = &self.pool {
            if pool.outstanding() != 0 {
                warn!(outstanding = pool.outstanding(), "video buffers unaccounted at close");
            }
        }
        self.pool = None;
        self.stage = StageState::Closed;
        self.state = PlaybackState::Idle;
        self.playing = false;
        self.clock.clear();
        debug!("video output closed");
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(OutputClosed);
        }
    }
}

impl Handler<DecodedFrame<VideoFrame>> for VideoOutput {
    fn handle(&mut self, event: DecodedFrame<VideoFrame>, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            trace!("video frame dropped: output not open");
            return;
        }
        if let Some(pool) = &mut self.pool {
            pool.note_station(&event.lease, SlotStation::Queued);
        }
        self.queue.push_back(event.lease);

        // First frame of a fresh open or of a seek: show it immediately so
        // the screen is never black or stale at the new position.
        let show_now = self.displayed.is_none() || self.state == PlaybackState::Flushed;
        if show_now {
            self.show_head();
        }
        if self.state == PlaybackState::Still || self.state == PlaybackState::Flushed {
            self.state = if self.playing {
                PlaybackState::Playing
            } else if self.state == PlaybackState::Flushed {
                PlaybackState::Paused
            } else {
                PlaybackState::Still
            };
        }
        self.schedule_next();
    }
}

impl Handler<AudioSyncInfo> for VideoOutput {
    fn handle(&mut self, event: AudioSyncInfo, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        if self.flush_ignore > 0 {
            trace!("audio snapshot ignored: flush in flight");
            return;
        }
        self.clock.set_snapshot(event.0);
        if self.state == PlaybackState::Still && self.playing {
            self.state = PlaybackState::Playing;
        }
        self.schedule_next();
    }
}

impl Handler<ShowNextFrame> for VideoOutput {
    fn handle(&mut self, _event: ShowNextFrame, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened || !self.playing {
            return;
        }
        self.show_head();
        self.schedule_next();
    }
}

impl Handler<FlushReq> for VideoOutput {
    fn handle(&mut self, event: FlushReq, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        if self.last_flush_epoch == Some(event.epoch) {
            trace!(epoch = event.epoch, "video flush skipped: epoch already flushed");
            return;
        }
        self.last_flush_epoch = Some(event.epoch);
        debug!(epoch = event.epoch, dropped = self.queue.len(), "video output flushing");
        // One increment per epoch, matched by exactly one acknowledgement
        // from the audio side regardless of frame-arrival timing.
        if self.has_audio {
            self.flush_ignore += 1;
        }
        if let Some(timer) = &self.schedule_timer {
            timer.disarm();
        }
        let queued: Vec<_> = self.queue.drain(..).collect();
        for lease in queued {
            self.return_lease(lease);
        }
        self.clock.clear();
        self.eos_pending = false;
        self.drained_sent = false;
        self.state = PlaybackState::Flushed;
    }
}

impl Handler<AudioFlushedInd> for VideoOutput {
    fn handle(&mut self, event: AudioFlushedInd, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        trace!(epoch = event.epoch, "audio flush acknowledged");
        self.flush_ignore -= 1;
    }
}

impl Handler<EndOfStreamInd> for VideoOutput {
    fn handle(&mut self, _event: EndOfStreamInd, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        self.eos_pending = true;
        self.drained_sent = false;
        self.schedule_next();
    }
}

impl Handler<PlayReq> for VideoOutput {
    fn handle(&mut self, _event: PlayReq, _ctx: &mut ActorContext<Self>) {
        self.playing = true;
        if self.stage != StageState::Opened {
            return;
        }
        self.state = PlaybackState::Playing;
        if !self.has_audio {
            let resume_pts = self
                .queue
                .front()
                .map(|lease| lease.data.pts_us)
                .or_else(|| self.displayed.as_ref().map(|lease| lease.data.pts_us));
            if let Some(pts_us) = resume_pts {
                self.clock.seed(pts_us, Instant::now());
            }
        }
        self.schedule_next();
    }
}

impl Handler<PauseReq> for VideoOutput {
    fn handle(&mut self, _event: PauseReq, _ctx: &mut ActorContext<Self>) {
        self.playing = false;
        if self.stage != StageState::Opened {
            return;
        }
        if let Some(timer) = &self.schedule_timer {
            timer.disarm();
        }
        self.state = PlaybackState::Paused;
    }
}

impl Handler<ShutdownReq> for VideoOutput {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "video output shutting down");
        if let Some(timer) = self.schedule_timer.take() {
            timer.disarm();
            drop(timer);
        }
        ctx.stop();
    }
}
