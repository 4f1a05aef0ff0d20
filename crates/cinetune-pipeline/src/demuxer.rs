//! Demuxer stage: owns the container reader and the backpressure-gated
//! read loop.
//!
//! The system stream and each elementary stream walk
//! Closed -> Opening -> Opened -> Closing. Close and seek requests that
//! arrive mid-transition are deferred and replayed once the transition
//! settles, never dropped. The read loop runs as a custom actor loop:
//! drain the mailbox, then read packet bursts while either stream still
//! has backpressure credit; when both are saturated the loop parks on the
//! mailbox instead, bounding memory when decoding is slower than demuxing.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, trace, warn};

use cinetune_core::{FileInfo, Notification, Packet, PipelineError, StageState, StreamKind};
use cinetune_runtime::actor::{
    spawn_actor_with_loop, ActorContext, ActorRef, Drained, Handler,
};

use crate::audio_decoder::AudioDecoderStage;
use crate::config::{PipelineConfig, READ_BURST_PACKETS};
use crate::control::ControlActor;
use crate::event_hub::EventHub;
use crate::messages::{
    Attach, CloseFileReq, CloseStreamReq, EndOfStreamInd, FileClosedInd, FileOpenedInd, FlushReq,
    OpenFileReq, OpenStreamReq, PacketConsumed, PacketMsg, PlaybackDrained, SeekAbsoluteReq,
    ShutdownReq, StageFailedInd, StreamClosed, StreamOpenFailed, StreamOpened,
};
use crate::ports::SourceOpener;
use crate::video_decoder::VideoDecoderStage;

#[derive(Debug, Default)]
struct StreamSlot {
    present: bool,
    state: StageState,
    failure: Option<String>,
    queued_packets: usize,
    ended: bool,
}

impl StreamSlot {
    fn reset(&mut self, present: bool) {
        *self = StreamSlot {
            present,
            ..StreamSlot::default()
        };
    }

    fn settled(&self) -> bool {
        !self.present || !self.state.is_transitioning()
    }
}

pub struct Demuxer {
    opener: SourceOpener,
    cfg: PipelineConfig,
    events: Arc<EventHub>,
    audio_dec: ActorRef<AudioDecoderStage>,
    video_dec: ActorRef<VideoDecoderStage>,
    control: Option<ActorRef<ControlActor>>,

    source: Option<Box<dyn crate::ports::MediaSource>>,
    info: FileInfo,
    system: StageState,
    audio: StreamSlot,
    video: StreamSlot,
    /// Read loop gate; false after EOS/read error until the next seek.
    reading: bool,
    /// Packet popped from the container whose stream is out of credit.
    parked: Option<Packet>,
    /// Bumped on every open and every successful seek; stale credits and
    /// flushes are discarded by epoch mismatch.
    epoch: u64,
    /// The current close is a rollback of a failed open attempt.
    open_abort: bool,
}

impl Demuxer {
    pub fn new(
        opener: SourceOpener,
        audio_dec: ActorRef<AudioDecoderStage>,
        video_dec: ActorRef<VideoDecoderStage>,
        events: Arc<EventHub>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            opener,
            cfg,
            events,
            audio_dec,
            video_dec,
            control: None,
            source: None,
            info: FileInfo::default(),
            system: StageState::Closed,
            audio: StreamSlot::default(),
            video: StreamSlot::default(),
            reading: false,
            parked: None,
            epoch: 0,
            open_abort: false,
        }
    }

    fn slot(&mut self, kind: StreamKind) -> &mut StreamSlot {
        match kind {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
        }
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    // ---- open ----

    fn begin_open(&mut self, path: &str) {
        let source = match (self.opener)(path) {
            Ok(source) => source,
            Err(e) => {
                self.events().emit(Notification::FileOpenFailed {
                    message: e.to_string(),
                });
                return;
            }
        };
        let info = source.file_info();
        if !info.has_audio && !info.has_video {
            self.events().emit(Notification::FileOpenFailed {
                message: "no playable streams".to_string(),
            });
            return;
        }

        self.epoch += 1;
        self.source = Some(source);
        self.info = info.clone();
        self.system = StageState::Opening;
        self.open_abort = false;
        self.parked = None;
        self.audio.reset(info.has_audio);
        self.video.reset(info.has_video);

        debug!(
            path,
            has_audio = info.has_audio,
            has_video = info.has_video,
            "opening file"
        );
        if !info.has_audio {
            self.events().emit(Notification::NoAudioStream);
        }
        if self.audio.present {
            self.audio.state = StageState::Opening;
            let _ = self.audio_dec.notify(OpenStreamReq {
                epoch: self.epoch,
                sibling_audio: true,
            });
        }
        if self.video.present {
            self.video.state = StageState::Opening;
            let _ = self.video_dec.notify(OpenStreamReq {
                epoch: self.epoch,
                sibling_audio: info.has_audio,
            });
        }
    }

    fn settle_open(&mut self, ctx: &mut ActorContext<Self>) {
        if !(self.audio.settled() && self.video.settled()) {
            return;
        }

        let failure = self.audio.failure.clone().or_else(|| self.video.failure.clone());
        if let Some(message) = failure {
            // Abort the whole attempt: close whatever did open, then
            // report the failure from the rollback.
            let any_open = self.close_open_streams();
            if any_open {
                self.system = StageState::Closing;
                self.open_abort = true;
                debug!(message = %message, "open failed; rolling back opened streams");
            } else {
                self.finish_close(ctx, Some(message));
            }
            return;
        }

        self.system = StageState::Opened;
        self.reading = true;
        debug!("file opened");
        self.events().emit(Notification::FileOpened {
            info: self.info.clone(),
        });
        if let Some(duration_us) = self.info.duration_us {
            self.events().emit(Notification::Duration { duration_us });
        }
        if let Some(size) = self.info.video_size {
            self.events().emit(Notification::VideoSize { size });
        }
        if let Some(control) = &self.control {
            let _ = control.notify(FileOpenedInd {
                info: self.info.clone(),
            });
        }
        ctx.release_deferred();
    }

    // ---- close ----

    /// Sends `CloseStreamReq` to every Opened stream; returns whether any
    /// close is now in flight.
    fn close_open_streams(&mut self) -> bool {
        let mut any = false;
        if self.audio.present && self.audio.state == StageState::Opened {
            self.audio.state = StageState::Closing;
            let _ = self.audio_dec.notify(CloseStreamReq);
            any = true;
        }
        if self.video.present && self.video.state == StageState::Opened {
            self.video.state = StageState::Closing;
            let _ = self.video_dec.notify(CloseStreamReq);
            any = true;
        }
        any
    }

    fn begin_close(&mut self, ctx: &mut ActorContext<Self>) {
        self.reading = false;
        self.parked = None;
        self.system = StageState::Closing;
        if !self.close_open_streams() {
            self.finish_close(ctx, None);
        }
    }

    fn finish_close(&mut self, ctx: &mut ActorContext<Self>, open_failure: Option<String>) {
        self.source = None;
        self.system = StageState::Closed;
        self.reading = false;
        self.parked = None;
        self.audio.reset(false);
        self.video.reset(false);

        if self.open_abort || open_failure.is_some() {
            self.open_abort = false;
            let message = open_failure.unwrap_or_else(|| "stream open failed".to_string());
            self.events().emit(Notification::FileOpenFailed { message });
        } else {
            debug!("file closed");
            self.events().emit(Notification::FileClosed);
            if let Some(control) = &self.control {
                let _ = control.notify(FileClosedInd);
            }
        }
        ctx.release_deferred();
    }

    // ---- seek ----

    fn do_seek(&mut self, position_us: i64) {
        let target_us = match self.info.duration_us {
            Some(duration_us) => position_us.clamp(0, duration_us),
            None => position_us.max(0),
        };
        let Some(source) = self.source.as_mut() else {
            return;
        };
        match source.seek_us(target_us) {
            Ok(native_us) => {
                self.epoch += 1;
                self.parked = None;
                self.audio.queued_packets = 0;
                self.video.queued_packets = 0;
                self.audio.ended = false;
                self.video.ended = false;
                self.reading = true;
                debug!(target_us, native_us, epoch = self.epoch, "seek done; flushing");
                let flush = FlushReq { epoch: self.epoch };
                if self.audio.present {
                    let _ = self.audio_dec.notify(flush);
                }
                if self.video.present {
                    let _ = self.video_dec.notify(flush);
                }
            }
            Err(e) => {
                warn!(target_us, error = %e, "seek failed; keeping current position");
                self.events().emit(Notification::Error {
                    message: format!("seek failed: {e}"),
                });
            }
        }
    }

    // ---- read loop ----

    fn has_credit(&self, kind: StreamKind) -> bool {
        let (slot, target) = match kind {
            StreamKind::Audio => (&self.audio, self.cfg.audio_packet_target),
            StreamKind::Video => (&self.video, self.cfg.video_packet_target),
        };
        slot.present && slot.state == StageState::Opened && slot.queued_packets < target
    }

    pub(crate) fn wants_read(&self) -> bool {
        if self.system != StageState::Opened || !self.reading || self.source.is_none() {
            return false;
        }
        match &self.parked {
            Some(packet) => self.has_credit(packet.stream),
            None => self.has_credit(StreamKind::Audio) || self.has_credit(StreamKind::Video),
        }
    }

    fn dispatch_packet(&mut self, packet: Packet) {
        let kind = packet.stream;
        self.slot(kind).queued_packets += 1;
        match kind {
            StreamKind::Audio => {
                let _ = self.audio_dec.notify(PacketMsg(packet));
            }
            StreamKind::Video => {
                let _ = self.video_dec.notify(PacketMsg(packet));
            }
        }
    }

    fn end_of_reads(&mut self, error: Option<PipelineError>) {
        match error {
            Some(e) => warn!(error = %e, "read failed; treating as end of stream"),
            None => debug!("end of stream reached"),
        }
        self.reading = false;
        self.parked = None;
        if self.audio.present {
            let _ = self.audio_dec.notify(EndOfStreamInd);
        }
        if self.video.present {
            let _ = self.video_dec.notify(EndOfStreamInd);
        }
    }

    /// One read burst. Packets whose stream is out of credit are parked,
    /// not dropped; reads stop until that credit returns.
    pub(crate) fn pump(&mut self) {
        if let Some(packet) = self.parked.take() {
            if self.has_credit(packet.stream) {
                self.dispatch_packet(packet);
            } else {
                self.parked = Some(packet);
                return;
            }
        }

        for _ in 0..READ_BURST_PACKETS {
            if !(self.has_credit(StreamKind::Audio) || self.has_credit(StreamKind::Video)) {
                return;
            }
            let Some(source) = self.source.as_mut() else {
                return;
            };
            match source.next_packet() {
                Ok(Some(packet)) => {
                    let slot = match packet.stream {
                        StreamKind::Audio => &self.audio,
                        StreamKind::Video => &self.video,
                    };
                    if !slot.present || slot.state != StageState::Opened {
                        trace!(stream = packet.stream.as_str(), "dropping packet for closed stream");
                        continue;
                    }
                    if self.has_credit(packet.stream) {
                        self.dispatch_packet(packet);
                    } else {
                        self.parked = Some(packet);
                        return;
                    }
                }
                Ok(None) => {
                    self.end_of_reads(None);
                    return;
                }
                Err(e) => {
                    self.end_of_reads(Some(e));
                    return;
                }
            }
        }
    }
}

// ---- handlers ----

impl Handler<Attach<ControlActor>> for Demuxer {
    fn handle(&mut self, event: Attach<ControlActor>, _ctx: &mut ActorContext<Self>) {
        self.control = Some(event.0);
    }
}

impl Handler<OpenFileReq> for Demuxer {
    fn handle(&mut self, event: OpenFileReq, _ctx: &mut ActorContext<Self>) {
        match self.system {
            StageState::Closed => self.begin_open(&event.path),
            state => trace!(?state, "open_file ignored: not closed"),
        }
    }
}

impl Handler<CloseFileReq> for Demuxer {
    fn handle(&mut self, event: CloseFileReq, ctx: &mut ActorContext<Self>) {
        match self.system {
            StageState::Opened => self.begin_close(ctx),
            StageState::Opening | StageState::Closing => {
                debug!("close_file deferred: transition in flight");
                ctx.defer(event);
            }
            StageState::Closed => trace!("close_file ignored: no file open"),
        }
    }
}

impl Handler<SeekAbsoluteReq> for Demuxer {
    fn handle(&mut self, event: SeekAbsoluteReq, ctx: &mut ActorContext<Self>) {
        match self.system {
            StageState::Opened => self.do_seek(event.position_us),
            StageState::Opening | StageState::Closing => {
                debug!("seek deferred: transition in flight");
                ctx.defer(event);
            }
            StageState::Closed => trace!("seek ignored: no file open"),
        }
    }
}

impl Handler<StreamOpened> for Demuxer {
    fn handle(&mut self, event: StreamOpened, ctx: &mut ActorContext<Self>) {
        if self.system != StageState::Opening {
            trace!(kind = event.kind.as_str(), "stream_opened ignored: not opening");
            return;
        }
        self.slot(event.kind).state = StageState::Opened;
        self.settle_open(ctx);
    }
}

impl Handler<StreamOpenFailed> for Demuxer {
    fn handle(&mut self, event: StreamOpenFailed, ctx: &mut ActorContext<Self>) {
        if self.system != StageState::Opening {
            trace!(kind = event.kind.as_str(), "stream_open_failed ignored: not opening");
            return;
        }
        warn!(kind = event.kind.as_str(), message = %event.message, "stream open failed");
        let slot = self.slot(event.kind);
        slot.state = StageState::Closed;
        slot.failure = Some(event.message);
        self.settle_open(ctx);
    }
}

impl Handler<StreamClosed> for Demuxer {
    fn handle(&mut self, event: StreamClosed, ctx: &mut ActorContext<Self>) {
        if self.system != StageState::Closing {
            trace!(kind = event.kind.as_str(), "stream_closed ignored: not closing");
            return;
        }
        self.slot(event.kind).state = StageState::Closed;
        let all_closed = (!self.audio.present || self.audio.state == StageState::Closed)
            && (!self.video.present || self.video.state == StageState::Closed);
        if all_closed {
            self.finish_close(ctx, None);
        }
    }
}

impl Handler<PacketConsumed> for Demuxer {
    fn handle(&mut self, event: PacketConsumed, _ctx: &mut ActorContext<Self>) {
        if event.epoch != self.epoch {
            trace!(
                kind = event.kind.as_str(),
                epoch = event.epoch,
                "stale packet credit discarded"
            );
            return;
        }
        let slot = self.slot(event.kind);
        slot.queued_packets = slot.queued_packets.saturating_sub(1);
    }
}

impl Handler<PlaybackDrained> for Demuxer {
    fn handle(&mut self, event: PlaybackDrained, _ctx: &mut ActorContext<Self>) {
        if self.system != StageState::Opened {
            return;
        }
        self.slot(event.kind).ended = true;
        let all_ended = (!self.audio.present || self.audio.ended)
            && (!self.video.present || self.video.ended);
        if all_ended {
            debug!("all streams drained");
            self.events().emit(Notification::EndOfStream);
        }
    }
}

impl Handler<StageFailedInd> for Demuxer {
    fn handle(&mut self, event: StageFailedInd, ctx: &mut ActorContext<Self>) {
        warn!(kind = event.kind.as_str(), message = %event.message, "stage failed");
        self.events().emit(Notification::Error {
            message: event.message,
        });
        if self.system == StageState::Opened {
            self.begin_close(ctx);
        }
    }
}

impl Handler<ShutdownReq> for Demuxer {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "demuxer shutting down");
        ctx.stop();
    }
}

/// Spawns the demuxer on its custom read loop.
pub fn spawn_demuxer(demuxer: Demuxer) -> std::io::Result<(ActorRef<Demuxer>, JoinHandle<()>)> {
    spawn_actor_with_loop(demuxer, "cinetune-demux", |mut actor, inbox, mut ctx| {
        loop {
            if inbox.dispatch_pending(&mut actor, &mut ctx) == Drained::Disconnected {
                break;
            }
            if ctx.is_stop_requested() {
                break;
            }
            if actor.wants_read() {
                actor.pump();
            } else if inbox.dispatch_blocking(&mut actor, &mut ctx) == Drained::Disconnected {
                break;
            }
            if ctx.is_stop_requested() {
                break;
            }
        }
        debug!("demuxer loop exited");
    })
}
