//! In-line deinterlace filter between the video decoder and output.
//!
//! Pass-through for frame ownership: every lease that arrives leaves for
//! the video output in the same handler, processed in place. Mode changes
//! and flushes clear the engine's field history so no stale field bleeds
//! into the next frame.

use tracing::debug;

use cinetune_core::{DeinterlaceMode, VideoFrame};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};

use crate::messages::{DecodedFrame, EndOfStreamInd, FlushReq, SetDeinterlaceModeReq, ShutdownReq};
use crate::ports::DeinterlaceEngine;
use crate::video_output::VideoOutput;

pub struct DeinterlacerStage {
    engine: Box<dyn DeinterlaceEngine>,
    output: ActorRef<VideoOutput>,
    mode: DeinterlaceMode,
}

impl DeinterlacerStage {
    pub fn new(engine: Box<dyn DeinterlaceEngine>, output: ActorRef<VideoOutput>) -> Self {
        Self {
            engine,
            output,
            mode: DeinterlaceMode::Off,
        }
    }
}

impl Handler<DecodedFrame<VideoFrame>> for DeinterlacerStage {
    fn handle(&mut self, mut event: DecodedFrame<VideoFrame>, _ctx: &mut ActorContext<Self>) {
        if self.mode != DeinterlaceMode::Off && event.lease.data.interlaced {
            self.engine.process(self.mode, &mut event.lease.data);
        }
        let _ = self.output.notify(event);
    }
}

impl Handler<SetDeinterlaceModeReq> for DeinterlacerStage {
    fn handle(&mut self, event: SetDeinterlaceModeReq, _ctx: &mut ActorContext<Self>) {
        if event.mode != self.mode {
            debug!(mode = ?event.mode, "deinterlace mode changed");
            self.engine.reset();
        }
        self.mode = event.mode;
    }
}

impl Handler<FlushReq> for DeinterlacerStage {
    fn handle(&mut self, event: FlushReq, _ctx: &mut ActorContext<Self>) {
        self.engine.reset();
        let _ = self.output.notify(event);
    }
}

impl Handler<EndOfStreamInd> for DeinterlacerStage {
    fn handle(&mut self, event: EndOfStreamInd, _ctx: &mut ActorContext<Self>) {
        let _ = self.output.notify(event);
    }
}

impl Handler<ShutdownReq> for DeinterlacerStage {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "deinterlacer shutting down");
        ctx.stop();
    }
}
