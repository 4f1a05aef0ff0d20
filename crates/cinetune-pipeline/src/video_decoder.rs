//! Video decoder stage.
//!
//! Mirrors the audio decoder, with one extra concern: decoded frames
//! either go straight to the video output or take a detour through the
//! deinterlacer, chosen by the current deinterlace mode. Open and close
//! traffic always goes directly to the output; only frame, flush and
//! end-of-stream traffic follows the route.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use cinetune_core::{DeinterlaceMode, Packet, StageState, StreamKind, VideoFrame};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};

use crate::deinterlacer::DeinterlacerStage;
use crate::demuxer::Demuxer;
use crate::messages::{
    Attach, CloseStreamReq, DecodedFrame, EndOfStreamInd, FlushReq, FrameReturned, OpenStreamReq,
    OutputCloseReq, OutputClosed, OutputOpenFailed, OutputOpenReq, OutputOpened, PacketConsumed,
    PacketMsg, PlaybackDrained, SelectDeinterlacerReq, SetDeinterlaceModeReq, ShutdownReq,
    StageFailedInd, StreamClosed, StreamOpenFailed, StreamOpened,
};
use crate::pool::FrameLease;
use crate::ports::VideoDecodeEngine;
use crate::video_output::VideoOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameRoute {
    Direct,
    Deinterlace,
}

pub struct VideoDecoderStage {
    engine: Box<dyn VideoDecodeEngine>,
    output: ActorRef<VideoOutput>,
    deinterlacer: ActorRef<DeinterlacerStage>,
    demuxer: Option<ActorRef<Demuxer>>,
    state: StageState,
    route: FrameRoute,
    free: Vec<FrameLease<VideoFrame>>,
    pending: VecDeque<Packet>,
    epoch: u64,
    eos_pending: bool,
}

impl VideoDecoderStage {
    pub fn new(
        engine: Box<dyn VideoDecodeEngine>,
        output: ActorRef<VideoOutput>,
        deinterlacer: ActorRef<DeinterlacerStage>,
    ) -> Self {
        Self {
            engine,
            output,
            deinterlacer,
            demuxer: None,
            state: StageState::Closed,
            route: FrameRoute::Direct,
            free: Vec::new(),
            pending: VecDeque::new(),
            epoch: 0,
            eos_pending: false,
        }
    }

    fn fail_open(&mut self, message: String) {
        self.state = StageState::Closed;
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(StreamOpenFailed {
                kind: StreamKind::Video,
                message,
            });
        }
    }

    fn route_frame(&self, lease: FrameLease<VideoFrame>) {
        match self.route {
            FrameRoute::Direct => {
                let _ = self.output.notify(DecodedFrame { lease });
            }
            FrameRoute::Deinterlace => {
                let _ = self.deinterlacer.notify(DecodedFrame { lease });
            }
        }
    }

    fn route_flush(&self, flush: FlushReq) {
        match self.route {
            FrameRoute::Direct => {
                let _ = self.output.notify(flush);
            }
            FrameRoute::Deinterlace => {
                let _ = self.deinterlacer.notify(flush);
            }
        }
    }

    fn route_eos(&self) {
        match self.route {
            FrameRoute::Direct => {
                let _ = self.output.notify(EndOfStreamInd);
            }
            FrameRoute::Deinterlace => {
                let _ = self.deinterlacer.notify(EndOfStreamInd);
            }
        }
    }

    fn drain_pending(&mut self) {
        while !self.free.is_empty() {
            let Some(packet) = self.pending.pop_front() else {
                break;
            };
            let Some(mut lease) = self.free.pop() else {
                break;
            };
            match self.engine.decode(&packet, &mut lease.data) {
                Ok(true) => self.route_frame(lease),
                Ok(false) => self.free.push(lease),
                Err(e) => {
                    debug!(pts_us = packet.pts_us, error = %e, "video packet dropped");
                    self.free.push(lease);
                }
            }
            if let Some(demuxer) = &self.demuxer {
                let _ = demuxer.notify(PacketConsumed {
                    kind: StreamKind::Video,
                    epoch: self.epoch,
                });
            }
        }
        if self.eos_pending && self.pending.is_empty() {
            self.eos_pending = false;
            self.route_eos();
        }
    }
}

impl Handler<Attach<Demuxer>> for VideoDecoderStage {
    fn handle(&mut self, event: Attach<Demuxer>, _ctx: &mut ActorContext<Self>) {
        self.demuxer = Some(event.0);
    }
}

impl Handler<OpenStreamReq> for VideoDecoderStage {
    fn handle(&mut self, event: OpenStreamReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Closed {
            warn!(state = ?self.state, "video open_stream ignored: not closed");
            return;
        }
        if let Err(e) = self.engine.open() {
            self.fail_open(e.to_string());
            return;
        }
        self.state = StageState::Opening;
        self.epoch = event.epoch;
        self.eos_pending = false;
        let _ = self.output.notify(OutputOpenReq {
            epoch: event.epoch,
            sibling_audio: event.sibling_audio,
        });
    }
}

impl Handler<OutputOpened<VideoFrame>> for VideoDecoderStage {
    fn handle(&mut self, event: OutputOpened<VideoFrame>, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opening {
            warn!(state = ?self.state, "video output_opened ignored");
            return;
        }
        self.free = event.leases;
        self.state = StageState::Opened;
        debug!(buffers = self.free.len(), "video stream opened");
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(StreamOpened {
                kind: StreamKind::Video,
            });
        }
    }
}

impl Handler<OutputOpenFailed> for VideoDecoderStage {
    fn handle(&mut self, event: OutputOpenFailed, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opening {
            return;
        }
        self.engine.close();
        self.fail_open(event.message);
    }
}

impl Handler<CloseStreamReq> for VideoDecoderStage {
    fn handle(&mut self, _event: CloseStreamReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            trace!(state = ?self.state, "video close_stream ignored");
            return;
        }
        self.state = StageState::Closing;
        self.pending.clear();
        self.eos_pending = false;
        let _ = self.output.notify(OutputCloseReq {
            leases: std::mem::take(&mut self.free),
        });
    }
}

impl Handler<OutputClosed> for VideoDecoderStage {
    fn handle(&mut self, _event: OutputClosed, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Closing {
            return;
        }
        self.engine.close();
        self.state = StageState::Closed;
        debug!("video stream closed");
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(StreamClosed {
                kind: StreamKind::Video,
            });
        }
    }
}

impl Handler<PacketMsg> for VideoDecoderStage {
    fn handle(&mut self, event: PacketMsg, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            trace!("video packet dropped: stream not open");
            return;
        }
        self.pending.push_back(event.0);
        self.drain_pending();
    }
}

impl Handler<FrameReturned<VideoFrame>> for VideoDecoderStage {
    fn handle(&mut self, event: FrameReturned<VideoFrame>, _ctx: &mut ActorContext<Self>) {
        match self.state {
            StageState::Opened => {
                self.free.push(event.lease);
                self.drain_pending();
            }
            _ => trace!(slot = event.lease.slot(), "late video buffer return dropped"),
        }
    }
}

impl Handler<FlushReq> for VideoDecoderStage {
    fn handle(&mut self, event: FlushReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            return;
        }
        debug!(epoch = event.epoch, dropped = self.pending.len(), "video decoder flushing");
        self.epoch = event.epoch;
        self.pending.clear();
        self.eos_pending = false;
        self.engine.reset();
        self.route_flush(event);
    }
}

impl Handler<EndOfStreamInd> for VideoDecoderStage {
    fn handle(&mut self, _event: EndOfStreamInd, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            return;
        }
        if self.pending.is_empty() {
            self.route_eos();
        } else {
            self.eos_pending = true;
        }
    }
}

impl Handler<SelectDeinterlacerReq> for VideoDecoderStage {
    fn handle(&mut self, event: SelectDeinterlacerReq, _ctx: &mut ActorContext<Self>) {
        let new_route = match event.mode {
            DeinterlaceMode::Off => FrameRoute::Direct,
            DeinterlaceMode::Weave | DeinterlaceMode::Bob => FrameRoute::Deinterlace,
        };
        if new_route != self.route {
            debug!(mode = ?event.mode, "switching frame route");
        }
        self.route = new_route;
        let _ = self.deinterlacer.notify(SetDeinterlaceModeReq { mode: event.mode });
    }
}

impl Handler<PlaybackDrained> for VideoDecoderStage {
    fn handle(&mut self, event: PlaybackDrained, _ctx: &mut ActorContext<Self>) {
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(event);
        }
    }
}

impl Handler<StageFailedInd> for VideoDecoderStage {
    fn handle(&mut self, event: StageFailedInd, _ctx: &mut ActorContext<Self>) {
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(event);
        }
    }
}

impl Handler<ShutdownReq> for VideoDecoderStage {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "video decoder shutting down");
        ctx.stop();
    }
}
