//! Pipeline assembly and the public player handle.
//!
//! Stages spawn sink-first so every actor's downstream reference exists at
//! construction; the remaining back-edges (decoder -> demuxer, output ->
//! decoder/control) are wired with attach messages once both ends exist.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use cinetune_core::{ControlCommand, Notification};
use cinetune_runtime::actor::{spawn_actor_named, ActorRef, SendError};

use crate::audio_decoder::AudioDecoderStage;
use crate::audio_output::AudioOutput;
use crate::config::PipelineConfig;
use crate::control::ControlActor;
use crate::deinterlacer::DeinterlacerStage;
use crate::demuxer::{spawn_demuxer, Demuxer};
use crate::event_hub::EventHub;
use crate::messages::{Attach, CommandMsg};
use crate::ports::{
    AudioDecodeEngine, AudioSink, DeinterlaceEngine, SourceOpener, VideoDecodeEngine, VideoSink,
};
use crate::video_decoder::VideoDecoderStage;
use crate::video_output::VideoOutput;

/// The media backends a player is built from.
pub struct PlayerPorts {
    pub open_source: SourceOpener,
    pub audio_engine: Box<dyn AudioDecodeEngine>,
    pub video_engine: Box<dyn VideoDecodeEngine>,
    pub deinterlace_engine: Box<dyn DeinterlaceEngine>,
    pub audio_sink: Box<dyn AudioSink>,
    pub video_sink: Box<dyn VideoSink>,
}

/// A running player. Dropping the handle leaves the pipeline running;
/// call [`PlayerHandle::shutdown`] to stop and join it.
pub struct PlayerHandle {
    control: ActorRef<ControlActor>,
    events: Arc<EventHub>,
    joins: Vec<std::thread::JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn send_command(&self, command: ControlCommand) -> Result<(), SendError> {
        self.control.notify(CommandMsg(command))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Stops every stage and joins their threads.
    pub fn shutdown(mut self) {
        if self.send_command(ControlCommand::Shutdown).is_err() {
            warn!("control mailbox already closed at shutdown");
        }
        for join in self.joins.drain(..) {
            if join.join().is_err() {
                warn!("pipeline thread panicked before joining");
            }
        }
        debug!("player shut down");
    }
}

/// Spawns the whole pipeline and returns its handle.
pub fn start_player(ports: PlayerPorts, cfg: PipelineConfig) -> std::io::Result<PlayerHandle> {
    let events = Arc::new(EventHub::new());

    let (video_out, video_out_join) = spawn_actor_named(
        VideoOutput::new(ports.video_sink, Arc::clone(&events), cfg.clone()),
        "cinetune-video-out",
    )?;
    let (audio_out, audio_out_join) = spawn_actor_named(
        AudioOutput::new(
            ports.audio_sink,
            video_out.clone(),
            Arc::clone(&events),
            cfg.clone(),
        ),
        "cinetune-audio-out",
    )?;
    let (deinterlacer, deinterlacer_join) = spawn_actor_named(
        DeinterlacerStage::new(ports.deinterlace_engine, video_out.clone()),
        "cinetune-deint",
    )?;
    let (video_dec, video_dec_join) = spawn_actor_named(
        VideoDecoderStage::new(ports.video_engine, video_out.clone(), deinterlacer.clone()),
        "cinetune-video-dec",
    )?;
    let (audio_dec, audio_dec_join) = spawn_actor_named(
        AudioDecoderStage::new(ports.audio_engine, audio_out.clone()),
        "cinetune-audio-dec",
    )?;
    let (demuxer, demuxer_join) = spawn_demuxer(Demuxer::new(
        ports.open_source,
        audio_dec.clone(),
        video_dec.clone(),
        Arc::clone(&events),
        cfg.clone(),
    ))?;
    let (control, control_join) = spawn_actor_named(
        ControlActor::new(
            demuxer.clone(),
            audio_dec.clone(),
            video_dec.clone(),
            deinterlacer.clone(),
            audio_out.clone(),
            video_out.clone(),
            Arc::clone(&events),
            cfg,
        ),
        "cinetune-control",
    )?;

    // Back-edges.
    let _ = audio_dec.notify(Attach(demuxer.clone()));
    let _ = video_dec.notify(Attach(demuxer.clone()));
    let _ = audio_out.notify(Attach(audio_dec.clone()));
    let _ = audio_out.notify(Attach(control.clone()));
    let _ = video_out.notify(Attach(video_dec.clone()));
    let _ = video_out.notify(Attach(control.clone()));
    let _ = demuxer.notify(Attach(control.clone()));

    debug!("player pipeline started");
    Ok(PlayerHandle {
        control,
        events,
        joins: vec![
            video_out_join,
            audio_out_join,
            deinterlacer_join,
            video_dec_join,
            audio_dec_join,
            demuxer_join,
            control_join,
        ],
    })
}
