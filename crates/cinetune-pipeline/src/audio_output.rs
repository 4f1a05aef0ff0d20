//! Audio output stage: owns the audio frame pool, feeds the device and
//! publishes the presentation clock.
//!
//! A periodic refill tick tops up the hardware buffer from the queued
//! frames and, on each tick, publishes one audio-clock snapshot to the
//! video side: the PTS about to be written minus the device latency is
//! what the listener hears right now. Between a flush and the next decoded
//! frame no snapshot leaves this stage, so the video side never schedules
//! against a dead clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use cinetune_core::{AudioFrame, Notification, StageState, StreamKind};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};
use cinetune_runtime::timer::{Schedule, Timer};

use crate::audio_decoder::AudioDecoderStage;
use crate::config::{PipelineConfig, CLIP_NOTIFY_INTERVAL};
use crate::control::ControlActor;
use crate::event_hub::EventHub;
use crate::messages::{
    Attach, AudioFlushedInd, AudioSyncInfo, DecodedFrame, EndOfStreamInd, FlushReq, FrameReturned,
    OutputCloseReq, OutputClosed, OutputOpenFailed, OutputOpenReq, OutputOpened, PauseReq, PlayReq,
    PlaybackDrained,
    ProgressInd, RefillTick, SetVolumeReq, ShutdownReq, StageFailedInd,
};
use crate::pool::{FrameLease, FramePool, SlotStation};
use crate::ports::AudioSink;

pub struct AudioOutput {
    sink: Box<dyn AudioSink>,
    video: ActorRef<crate::video_output::VideoOutput>,
    decoder: Option<ActorRef<AudioDecoderStage>>,
    control: Option<ActorRef<ControlActor>>,
    events: Arc<EventHub>,
    cfg: PipelineConfig,

    stage: StageState,
    pool: Option<FramePool<AudioFrame>>,
    queue: VecDeque<FrameLease<AudioFrame>>,
    /// Interleaved samples of the head frame already written to the device.
    head_offset: usize,
    /// PTS of the next sample to be written.
    next_write_pts_us: Option<i64>,
    last_audible_pts_us: Option<i64>,
    volume: f64,
    playing: bool,
    eos_pending: bool,
    drained_sent: bool,
    /// Set by a flush, cleared by the next decoded frame. While set, no
    /// snapshot leaves this stage.
    flushed: bool,
    /// Flush epoch already acknowledged to the video side. Exactly one
    /// `AudioFlushedInd` goes out per epoch.
    last_flush_epoch: Option<u64>,
    refill_timer: Option<Timer>,
    last_clip_notify: Option<Instant>,
    last_progress: Option<Instant>,
}

impl AudioOutput {
    pub fn new(
        sink: Box<dyn AudioSink>,
        video: ActorRef<crate::video_output::VideoOutput>,
        events: Arc<EventHub>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            sink,
            video,
            decoder: None,
            control: None,
            events,
            cfg,
            stage: StageState::Closed,
            pool: None,
            queue: VecDeque::new(),
            head_offset: 0,
            next_write_pts_us: None,
            last_audible_pts_us: None,
            volume: 1.0,
            playing: false,
            eos_pending: false,
            drained_sent: false,
            flushed: false,
            last_flush_epoch: None,
            refill_timer: None,
            last_clip_notify: None,
            last_progress: None,
        }
    }

    fn fail(&mut self, message: String) {
        warn!(message = %message, "audio output failed");
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(StageFailedInd {
                kind: StreamKind::Audio,
                message,
            });
        }
    }

    /// Top up the device buffer from the frame queue. Frames fully written
    /// go back to the decoder.
    fn write_frames(&mut self) {
        loop {
            let Some(head) = self.queue.front() else {
                return;
            };
            if self.head_offset == 0 {
                // Frame boundary: re-anchor the write cursor on the
                // frame's own PTS so decoder gaps do not drift the clock.
                self.next_write_pts_us = Some(head.data.pts_us);
            }
            let written = match self.sink.write(&head.data, self.head_offset) {
                Ok(written) => written,
                Err(e) => {
                    self.fail(e.to_string());
                    return;
                }
            };
            if written == 0 {
                return;
            }
            let frame_len = head.data.samples.len();
            let end = (self.head_offset + written).min(frame_len);
            let peak = head.data.samples[self.head_offset..end]
                .iter()
                .fold(0.0f32, |acc, s| acc.max(s.abs()));
            let advanced_us = head.data.samples_to_us(written);

            self.note_clipping(peak);
            self.next_write_pts_us = self.next_write_pts_us.map(|pts| pts + advanced_us);
            self.head_offset += written;

            if self.head_offset >= frame_len {
                self.head_offset = 0;
                if let Some(lease) = self.queue.pop_front() {
                    self.return_lease(lease);
                }
            }
        }
    }

    fn note_clipping(&mut self, peak: f32) {
        let scaled = peak * self.volume as f32;
        if scaled <= 1.0 {
            return;
        }
        let now = Instant::now();
        let due = self
            .last_clip_notify
            .map_or(true, |t| now.duration_since(t) >= CLIP_NOTIFY_INTERVAL);
        if due {
            self.last_clip_notify = Some(now);
            self.events.emit(Notification::Clipping { peak: scaled });
        }
    }

    fn return_lease(&mut self, lease: FrameLease<AudioFrame>) {
        if let Some(pool) = &mut self.pool {
            pool.note_station(&lease, SlotStation::Decoder);
        }
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(FrameReturned { lease });
        }
    }

    /// One audio-clock observation for the video scheduler.
    fn publish_sync(&mut self) {
        if self.flushed {
            return;
        }
        let Some(next_write) = self.next_write_pts_us else {
            return;
        };
        let mut audible = next_write - self.sink.latency_us();
        if let Some(prev) = self.last_audible_pts_us {
            // Latency estimates jitter; never let the clock step backwards.
            audible = audible.max(prev);
        }
        self.last_audible_pts_us = Some(audible);
        let _ = self.video.notify(AudioSyncInfo::new(audible, Instant::now()));
    }

    fn notify_progress(&mut self) {
        let Some(pts_us) = self.last_audible_pts_us else {
            return;
        };
        let now = Instant::now();
        let due = self
            .last_progress
            .map_or(true, |t| now.duration_since(t) >= self.cfg.progress_interval);
        if due {
            self.last_progress = Some(now);
            if let Some(control) = &self.control {
                let _ = control.notify(ProgressInd {
                    kind: StreamKind::Audio,
                    pts_us,
                });
            }
        }
    }

    fn check_eos(&mut self) {
        if !self.eos_pending || self.drained_sent {
            return;
        }
        if self.queue.is_empty() && self.sink.queued_us() <= 0 {
            self.drained_sent = true;
            debug!("audio drained");
            if let Some(decoder) = &self.decoder {
                let _ = decoder.notify(PlaybackDrained {
                    kind: StreamKind::Audio,
                });
            }
        }
    }

    fn reclaim(&mut self, leases: Vec<FrameLease<AudioFrame>>) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        for lease in leases {
            if let Err(e) = pool.check_in(lease) {
                warn!(error = %e, "audio buffer reclaim failed");
            }
        }
    }
}

impl Handler<Attach<AudioDecoderStage>> for AudioOutput {
    fn handle(&mut self, event: Attach<AudioDecoderStage>, _ctx: &mut ActorContext<Self>) {
        self.decoder = Some(event.0);
    }
}

impl Handler<Attach<ControlActor>> for AudioOutput {
    fn handle(&mut self, event: Attach<ControlActor>, _ctx: &mut ActorContext<Self>) {
        self.control = Some(event.0);
    }
}

impl Handler<OutputOpenReq> for AudioOutput {
    fn handle(&mut self, _event: OutputOpenReq, ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Closed {
            warn!(stage = ?self.stage, "audio output open ignored: not closed");
            return;
        }
        let mut pool = FramePool::new(self.cfg.frame_pool_slots);
        let leases = pool.checkout_all(SlotStation::Decoder);
        self.pool = Some(pool);
        self.stage = StageState::Opened;
        self.playing = false;
        self.flushed = false;
        self.last_flush_epoch = None;
        self.eos_pending = false;
        self.drained_sent = false;
        self.head_offset = 0;
        self.next_write_pts_us = None;
        self.last_audible_pts_us = None;

        if self.refill_timer.is_none() {
            match Timer::for_actor("cinetune-audio-refill", ctx.actor_ref(), RefillTick) {
                Ok(timer) => self.refill_timer = Some(timer),
                Err(e) => {
                    warn!(error = %e, "audio refill timer spawn failed");
                    if let Some(decoder) = &self.decoder {
                        let _ = decoder.notify(OutputOpenFailed {
                            message: format!("refill timer spawn failed: {e}"),
                        });
                    }
                    self.stage = StageState::Closed;
                    self.pool = None;
                    return;
                }
            }
        }
        if let Some(timer) = &self.refill_timer {
            timer.arm(Schedule::Periodic(self.cfg.refill_tick));
        }

        debug!(buffers = self.cfg.frame_pool_slots, "audio output opened");
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(OutputOpened { leases });
        }
    }
}

impl Handler<OutputCloseReq<AudioFrame>> for AudioOutput {
    fn handle(&mut self, event: OutputCloseReq<AudioFrame>, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            trace!(stage = ?self.stage, "audio output close ignored");
            return;
        }
        if let Some(timer) = &self.refill_timer {
            timer.disarm();
        }
        self.sink.stop();
        self.reclaim(event.leases);
        let queued: Vec<_> = self.queue.drain(..).collect();
        self.reclaim(queued);
        if let Some(pool) = &self.pool {
            if pool.outstanding() != 0 {
                warn!(outstanding = pool.outstanding(), "audio buffers unaccounted at close");
            }
        }
        self.pool = None;
        self.stage = StageState::Closed;
        self.playing = false;
        self.head_offset = 0;
        self.next_write_pts_us = None;
        self.last_audible_pts_us = None;
        debug!("audio output closed");
        if let Some(decoder) = &self.decoder {
            let _ = decoder.notify(OutputClosed);
        }
    }
}

impl Handler<DecodedFrame<AudioFrame>> for AudioOutput {
    fn handle(&mut self, event: DecodedFrame<AudioFrame>, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            trace!("audio frame dropped: output not open");
            return;
        }
        self.flushed = false;
        if let Some(pool) = &mut self.pool {
            pool.note_station(&event.lease, SlotStation::Queued);
        }
        self.queue.push_back(event.lease);
        if self.playing {
            self.write_frames();
        }
    }
}

impl Handler<RefillTick> for AudioOutput {
    fn handle(&mut self, _event: RefillTick, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        if self.playing {
            self.write_frames();
            self.publish_sync();
            self.notify_progress();
        }
        self.check_eos();
    }
}

impl Handler<FlushReq> for AudioOutput {
    fn handle(&mut self, event: FlushReq, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        if self.last_flush_epoch == Some(event.epoch) {
            trace!(epoch = event.epoch, "audio flush skipped: epoch already flushed");
            return;
        }
        self.last_flush_epoch = Some(event.epoch);
        self.flushed = true;
        debug!(epoch = event.epoch, dropped = self.queue.len(), "audio output flushing");

        let queued: Vec<_> = self.queue.drain(..).collect();
        for lease in queued {
            self.return_lease(lease);
        }
        self.head_offset = 0;
        self.sink.stop();
        if self.playing {
            self.sink.start();
        }
        self.next_write_pts_us = None;
        self.last_audible_pts_us = None;
        self.eos_pending = false;
        self.drained_sent = false;
        // One acknowledgement per epoch, even when there was nothing to
        // drop; the video side counts on the pairing.
        let _ = self.video.notify(AudioFlushedInd { epoch: event.epoch });
    }
}

impl Handler<EndOfStreamInd> for AudioOutput {
    fn handle(&mut self, _event: EndOfStreamInd, _ctx: &mut ActorContext<Self>) {
        if self.stage != StageState::Opened {
            return;
        }
        self.eos_pending = true;
        self.drained_sent = false;
    }
}

impl Handler<PlayReq> for AudioOutput {
    fn handle(&mut self, _event: PlayReq, _ctx: &mut ActorContext<Self>) {
        self.playing = true;
        if self.stage != StageState::Opened {
            return;
        }
        self.sink.start();
        self.write_frames();
        self.publish_sync();
    }
}

impl Handler<PauseReq> for AudioOutput {
    fn handle(&mut self, _event: PauseReq, _ctx: &mut ActorContext<Self>) {
        self.playing = false;
        if self.stage != StageState::Opened {
            return;
        }
        self.sink.pause();
    }
}

impl Handler<SetVolumeReq> for AudioOutput {
    fn handle(&mut self, event: SetVolumeReq, _ctx: &mut ActorContext<Self>) {
        self.volume = event.linear.clamp(0.0, 4.0);
        self.sink.set_volume(self.volume);
    }
}

impl Handler<ShutdownReq> for AudioOutput {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "audio output shutting down");
        if let Some(timer) = self.refill_timer.take() {
            timer.disarm();
            drop(timer);
        }
        self.sink.stop();
        ctx.stop();
    }
}
