//! Control actor: the single entry point for user commands and the keeper
//! of the externally visible playback position.
//!
//! Position is audio-led: video progress reports only count when the open
//! file has no audio stream. Relative seeks resolve against the last
//! reported position before they reach the demuxer.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use cinetune_core::{ControlCommand, FileInfo, Notification, StreamKind};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};

use crate::audio_decoder::AudioDecoderStage;
use crate::audio_output::AudioOutput;
use crate::config::PipelineConfig;
use crate::deinterlacer::DeinterlacerStage;
use crate::demuxer::Demuxer;
use crate::event_hub::EventHub;
use crate::messages::{
    CloseFileReq, CommandMsg, FileClosedInd, FileOpenedInd, OpenFileReq, PauseReq, PlayReq,
    ProgressInd, SeekAbsoluteReq, SelectDeinterlacerReq, SetVolumeReq, ShutdownReq,
};
use crate::video_decoder::VideoDecoderStage;
use crate::video_output::VideoOutput;

pub struct ControlActor {
    demuxer: ActorRef<Demuxer>,
    audio_dec: ActorRef<AudioDecoderStage>,
    video_dec: ActorRef<VideoDecoderStage>,
    deinterlacer: ActorRef<DeinterlacerStage>,
    audio_out: ActorRef<AudioOutput>,
    video_out: ActorRef<VideoOutput>,
    events: Arc<EventHub>,
    cfg: PipelineConfig,

    info: Option<FileInfo>,
    position_us: i64,
    last_time_emit: Option<Instant>,
}

impl ControlActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        demuxer: ActorRef<Demuxer>,
        audio_dec: ActorRef<AudioDecoderStage>,
        video_dec: ActorRef<VideoDecoderStage>,
        deinterlacer: ActorRef<DeinterlacerStage>,
        audio_out: ActorRef<AudioOutput>,
        video_out: ActorRef<VideoOutput>,
        events: Arc<EventHub>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            demuxer,
            audio_dec,
            video_dec,
            deinterlacer,
            audio_out,
            video_out,
            events,
            cfg,
            info: None,
            position_us: 0,
            last_time_emit: None,
        }
    }

    fn leads_position(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Audio => true,
            StreamKind::Video => self.info.as_ref().map_or(false, |info| !info.has_audio),
        }
    }

    fn shutdown_all(&self, ctx: &mut ActorContext<Self>, reason: &str) {
        debug!(reason, "shutting the pipeline down");
        let req = ShutdownReq::new(reason);
        let _ = self.demuxer.notify(req.clone());
        let _ = self.audio_dec.notify(req.clone());
        let _ = self.video_dec.notify(req.clone());
        let _ = self.deinterlacer.notify(req.clone());
        let _ = self.audio_out.notify(req.clone());
        let _ = self.video_out.notify(req);
        ctx.stop();
    }
}

impl Handler<CommandMsg> for ControlActor {
    fn handle(&mut self, event: CommandMsg, ctx: &mut ActorContext<Self>) {
        match event.0 {
            ControlCommand::OpenFile { path } => {
                let _ = self.demuxer.notify(OpenFileReq { path });
            }
            ControlCommand::CloseFile => {
                let _ = self.demuxer.notify(CloseFileReq);
            }
            ControlCommand::Play => {
                let _ = self.audio_out.notify(PlayReq);
                let _ = self.video_out.notify(PlayReq);
            }
            ControlCommand::Pause => {
                let _ = self.audio_out.notify(PauseReq);
                let _ = self.video_out.notify(PauseReq);
            }
            ControlCommand::SeekAbsolute { position_us } => {
                let _ = self.demuxer.notify(SeekAbsoluteReq { position_us });
            }
            ControlCommand::SeekRelative { delta_us } => {
                let position_us = (self.position_us + delta_us).max(0);
                let _ = self.demuxer.notify(SeekAbsoluteReq { position_us });
            }
            ControlCommand::SetVolume { linear } => {
                let _ = self.audio_out.notify(SetVolumeReq { linear });
            }
            ControlCommand::SelectDeinterlacer { mode } => {
                let _ = self.video_dec.notify(SelectDeinterlacerReq { mode });
            }
            ControlCommand::Shutdown => self.shutdown_all(ctx, "shutdown command"),
        }
    }
}

impl Handler<ProgressInd> for ControlActor {
    fn handle(&mut self, event: ProgressInd, _ctx: &mut ActorContext<Self>) {
        if !self.leads_position(event.kind) {
            trace!(kind = event.kind.as_str(), "progress ignored: not the leading stream");
            return;
        }
        self.position_us = event.pts_us.max(0);
        let now = Instant::now();
        let due = self
            .last_time_emit
            .map_or(true, |t| now.duration_since(t) >= self.cfg.progress_interval);
        if due {
            self.last_time_emit = Some(now);
            self.events.emit(Notification::CurrentTime {
                position_us: self.position_us,
            });
        }
    }
}

impl Handler<FileOpenedInd> for ControlActor {
    fn handle(&mut self, event: FileOpenedInd, _ctx: &mut ActorContext<Self>) {
        self.info = Some(event.info);
        self.position_us = 0;
        self.last_time_emit = None;
    }
}

impl Handler<FileClosedInd> for ControlActor {
    fn handle(&mut self, _event: FileClosedInd, _ctx: &mut ActorContext<Self>) {
        self.info = None;
        self.position_us = 0;
    }
}

impl Handler<ShutdownReq> for ControlActor {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        self.shutdown_all(ctx, &event.reason);
    }
}
