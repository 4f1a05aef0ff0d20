//! Audio decoder stage.
//!
//! Sits between the demuxer and the audio output. Decodes into pooled
//! frame buffers lent by the output at stream open; when no free buffer is
//! left the stage simply stops draining its packet queue, which starves
//! the demuxer of credits and stalls reading. Decode failures drop the
//! packet and keep the stream alive.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use cinetune_core::{AudioFrame, Packet, StageState, StreamKind};
use cinetune_runtime::actor::{ActorContext, ActorRef, Handler};

use crate::audio_output::AudioOutput;
use crate::demuxer::Demuxer;
use crate::messages::{
    Attach, CloseStreamReq, DecodedFrame, EndOfStreamInd, FlushReq, FrameReturned, OpenStreamReq,
    OutputCloseReq, OutputClosed, OutputOpenFailed, OutputOpenReq, OutputOpened, PacketConsumed,
    PacketMsg, PlaybackDrained, ShutdownReq, StageFailedInd, StreamClosed, StreamOpenFailed,
    StreamOpened,
};
use crate::pool::FrameLease;
use crate::ports::AudioDecodeEngine;

pub struct AudioDecoderStage {
    engine: Box<dyn AudioDecodeEngine>,
    output: ActorRef<AudioOutput>,
    demuxer: Option<ActorRef<Demuxer>>,
    state: StageState,
    free: Vec<FrameLease<AudioFrame>>,
    pending: VecDeque<Packet>,
    epoch: u64,
    eos_pending: bool,
}

impl AudioDecoderStage {
    pub fn new(engine: Box<dyn AudioDecodeEngine>, output: ActorRef<AudioOutput>) -> Self {
        Self {
            engine,
            output,
            demuxer: None,
            state: StageState::Closed,
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
                kind: StreamKind::Audio,
                message,
            });
        }
    }

    /// Decodes as long as both a packet and a free buffer are available.
    fn drain_pending(&mut self) {
        while !self.free.is_empty() {
            let Some(packet) = self.pending.pop_front() else {
                break;
            };
            let Some(mut lease) = self.free.pop() else {
                break;
            };
            match self.engine.decode(&packet, &mut lease.data) {
                Ok(true) => {
                    let _ = self.output.notify(DecodedFrame { lease });
                }
                Ok(false) => self.free.push(lease),
                Err(e) => {
                    debug!(pts_us = packet.pts_us, error = %e, "audio packet dropped");
                    self.free.push(lease);
                }
            }
            if let Some(demuxer) = &self.demuxer {
                let _ = demuxer.notify(PacketConsumed {
                    kind: StreamKind::Audio,
                    epoch: self.epoch,
                });
            }
        }
        if self.eos_pending && self.pending.is_empty() {
            self.eos_pending = false;
            let _ = self.output.notify(EndOfStreamInd);
        }
    }
}

impl Handler<Attach<Demuxer>> for AudioDecoderStage {
    fn handle(&mut self, event: Attach<Demuxer>, _ctx: &mut ActorContext<Self>) {
        self.demuxer = Some(event.0);
    }
}

impl Handler<OpenStreamReq> for AudioDecoderStage {
    fn handle(&mut self, event: OpenStreamReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Closed {
            warn!(state = ?self.state, "audio open_stream ignored: not closed");
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

impl Handler<OutputOpened<AudioFrame>> for AudioDecoderStage {
    fn handle(&mut self, event: OutputOpened<AudioFrame>, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opening {
            warn!(state = ?self.state, "audio output_opened ignored");
            return;
        }
        self.free = event.leases;
        self.state = StageState::Opened;
        debug!(buffers = self.free.len(), "audio stream opened");
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(StreamOpened {
                kind: StreamKind::Audio,
            });
        }
    }
}

impl Handler<OutputOpenFailed> for AudioDecoderStage {
    fn handle(&mut self, event: OutputOpenFailed, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opening {
            return;
        }
        self.engine.close();
        self.fail_open(event.message);
    }
}

impl Handler<CloseStreamReq> for AudioDecoderStage {
    fn handle(&mut self, _event: CloseStreamReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            trace!(state = ?self.state, "audio close_stream ignored");
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

impl Handler<OutputClosed> for AudioDecoderStage {
    fn handle(&mut self, _event: OutputClosed, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Closing {
            return;
        }
        self.engine.close();
        self.state = StageState::Closed;
        debug!("audio stream closed");
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(StreamClosed {
                kind: StreamKind::Audio,
            });
        }
    }
}

impl Handler<PacketMsg> for AudioDecoderStage {
    fn handle(&mut self, event: PacketMsg, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            trace!("audio packet dropped: stream not open");
            return;
        }
        self.pending.push_back(event.0);
        self.drain_pending();
    }
}

impl Handler<FrameReturned<AudioFrame>> for AudioDecoderStage {
    fn handle(&mut self, event: FrameReturned<AudioFrame>, _ctx: &mut ActorContext<Self>) {
        match self.state {
            StageState::Opened => {
                self.free.push(event.lease);
                self.drain_pending();
            }
            // A return racing the close window; the output reclaims the
            // slot from its own records.
            _ => trace!(slot = event.lease.slot(), "late audio buffer return dropped"),
        }
    }
}

impl Handler<FlushReq> for AudioDecoderStage {
    fn handle(&mut self, event: FlushReq, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            return;
        }
        debug!(epoch = event.epoch, dropped = self.pending.len(), "audio decoder flushing");
        self.epoch = event.epoch;
        self.pending.clear();
        self.eos_pending = false;
        self.engine.reset();
        let _ = self.output.notify(event);
    }
}

impl Handler<EndOfStreamInd> for AudioDecoderStage {
    fn handle(&mut self, event: EndOfStreamInd, _ctx: &mut ActorContext<Self>) {
        if self.state != StageState::Opened {
            return;
        }
        if self.pending.is_empty() {
            let _ = self.output.notify(event);
        } else {
            self.eos_pending = true;
        }
    }
}

impl Handler<PlaybackDrained> for AudioDecoderStage {
    fn handle(&mut self, event: PlaybackDrained, _ctx: &mut ActorContext<Self>) {
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(event);
        }
    }
}

impl Handler<StageFailedInd> for AudioDecoderStage {
    fn handle(&mut self, event: StageFailedInd, _ctx: &mut ActorContext<Self>) {
        if let Some(demuxer) = &self.demuxer {
            let _ = demuxer.notify(event);
        }
    }
}

impl Handler<ShutdownReq> for AudioDecoderStage {
    fn handle(&mut self, event: ShutdownReq, ctx: &mut ActorContext<Self>) {
        debug!(reason = %event.reason, "audio decoder shutting down");
        ctx.stop();
    }
}
