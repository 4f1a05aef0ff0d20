//! Thread-per-actor runtime.
//!
//! Every actor owns exactly one OS thread draining one mailbox, so handler
//! code is strictly sequential and needs no internal locking. Cross-actor
//! communication is mailbox enqueue only; the handler set is resolved
//! statically, so an event the actor does not handle is a compile error.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::warn;

pub trait Actor: Send + 'static {}

impl<T> Actor for T where T: Send + 'static {}

pub trait Event: Send + 'static {
    type Response: Send + 'static;
}

pub trait Handler<E>: Actor + Sized
where
    E: Event,
{
    fn handle(&mut self, event: E, ctx: &mut ActorContext<Self>) -> E::Response;
}

trait Envelope<A: Actor>: Send + 'static {
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>);
}

struct NotifyEnvelope<E, A>
where
    E: Event<Response = ()>,
    A: Handler<E>,
{
    event: E,
    self_ref: ActorRef<A>,
    _marker: PhantomData<fn() -> A>,
}

impl<E, A> Envelope<A> for NotifyEnvelope<E, A>
where
    E: Event<Response = ()>,
    A: Handler<E>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        ctx.enter_event(self.self_ref.clone());
        actor.handle(self.event, ctx);
        ctx.leave_event();
    }
}

struct RequestEnvelope<E, A>
where
    E: Event,
    A: Handler<E>,
{
    event: E,
    response_tx: oneshot::Sender<E::Response>,
    self_ref: ActorRef<A>,
    _marker: PhantomData<fn() -> A>,
}

impl<E, A> Envelope<A> for RequestEnvelope<E, A>
where
    E: Event,
    A: Handler<E>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        ctx.enter_event(self.self_ref.clone());
        let response = actor.handle(self.event, ctx);
        ctx.leave_event();
        let _ = self.response_tx.send(response);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    MailboxClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    MailboxClosed,
    Timeout,
    ActorStopped,
}

/// Per-actor execution context, available only inside handlers.
///
/// Carries the cooperative stop flag and the deferral queue. An event the
/// actor cannot process mid-transition is set aside with [`defer`] and
/// replayed through the mailbox with [`release_deferred`] once the actor is
/// ready again; replay through the mailbox (rather than immediate
/// re-delivery) is what keeps a blocked request from busy-looping.
///
/// [`defer`]: ActorContext::defer
/// [`release_deferred`]: ActorContext::release_deferred
pub struct ActorContext<A: Actor> {
    stop_requested: bool,
    self_ref: Option<ActorRef<A>>,
    deferred: VecDeque<Box<dyn Envelope<A>>>,
}

impl<A: Actor> ActorContext<A> {
    fn new() -> Self {
        Self {
            stop_requested: false,
            self_ref: None,
            deferred: VecDeque::new(),
        }
    }

    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn actor_ref(&self) -> ActorRef<A> {
        self.self_ref
            .as_ref()
            .expect("actor_ref is only available while handling an event")
            .clone()
    }

    /// Sets an event aside until the actor can process it again.
    pub fn defer<E>(&mut self, event: E)
    where
        E: Event<Response = ()>,
        A: Handler<E>,
    {
        let self_ref = self.actor_ref();
        self.deferred.push_back(Box::new(NotifyEnvelope::<E, A> {
            event,
            self_ref,
            _marker: PhantomData,
        }));
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Replays all deferred events, in original order, through the mailbox.
    pub fn release_deferred(&mut self) {
        let self_ref = self.actor_ref();
        while let Some(envelope) = self.deferred.pop_front() {
            if self_ref.tx.send(envelope).is_err() {
                warn!("deferred event dropped: mailbox closed");
                return;
            }
        }
    }

    fn enter_event(&mut self, self_ref: ActorRef<A>) {
        self.self_ref = Some(self_ref);
    }

    fn leave_event(&mut self) {
        self.self_ref = None;
    }
}

/// Clonable sending half of an actor's mailbox.
pub struct ActorRef<A: Actor> {
    tx: Sender<Box<dyn Envelope<A>>>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A: Actor> ActorRef<A> {
    /// Enqueues an event without waiting for it to be handled.
    ///
    /// Non-blocking and callable from any thread. Events from one sender to
    /// one actor are handled in send order; no order is guaranteed across
    /// different senders.
    pub fn notify<E>(&self, event: E) -> Result<(), SendError>
    where
        E: Event<Response = ()>,
        A: Handler<E>,
    {
        let envelope: Box<dyn Envelope<A>> = Box::new(NotifyEnvelope::<E, A> {
            event,
            self_ref: self.clone(),
            _marker: PhantomData,
        });
        self.tx.send(envelope).map_err(|_| SendError::MailboxClosed)
    }

    pub fn request<E>(&self, event: E, timeout: Duration) -> Result<E::Response, RequestError>
    where
        E: Event,
        A: Handler<E>,
    {
        crate::block_on(self.request_async(event, timeout))
    }

    pub async fn request_async<E>(
        &self,
        event: E,
        timeout: Duration,
    ) -> Result<E::Response, RequestError>
    where
        E: Event,
        A: Handler<E>,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let envelope: Box<dyn Envelope<A>> = Box::new(RequestEnvelope::<E, A> {
            event,
            response_tx,
            self_ref: self.clone(),
            _marker: PhantomData,
        });
        self.tx
            .send(envelope)
            .map_err(|_| RequestError::MailboxClosed)?;
        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::ActorStopped),
            Err(_) => Err(RequestError::Timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// Mailbox is (momentarily) empty.
    Idle,
    /// Every `ActorRef` is gone; no further events can arrive.
    Disconnected,
}

/// Receiving half of an actor's mailbox, for custom run loops.
///
/// A stage that interleaves its own work with event handling (the demuxer's
/// read loop) drains with [`dispatch_pending`] between work bursts and parks
/// on [`dispatch_blocking`] when it has nothing to do. Custom loops must
/// poll `ctx.is_stop_requested()` between bursts.
///
/// [`dispatch_pending`]: Inbox::dispatch_pending
/// [`dispatch_blocking`]: Inbox::dispatch_blocking
pub struct Inbox<A: Actor> {
    rx: Receiver<Box<dyn Envelope<A>>>,
}

impl<A: Actor> Inbox<A> {
    /// Handles every already-queued event, without blocking.
    pub fn dispatch_pending(&self, actor: &mut A, ctx: &mut ActorContext<A>) -> Drained {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    envelope.deliver(actor, ctx);
                    if ctx.is_stop_requested() {
                        return Drained::Idle;
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => return Drained::Idle,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    return Drained::Disconnected;
                }
            }
        }
    }

    /// Parks until one event arrives and handles it.
    pub fn dispatch_blocking(&self, actor: &mut A, ctx: &mut ActorContext<A>) -> Drained {
        match self.rx.recv() {
            Ok(envelope) => {
                envelope.deliver(actor, ctx);
                Drained::Idle
            }
            Err(_) => Drained::Disconnected,
        }
    }
}

pub fn spawn_actor<A: Actor>(actor: A) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)> {
    spawn_actor_named(actor, "cinetune-actor")
}

/// Spawns an actor with the standard run loop: park, dispatch, honor the
/// stop flag, isolate handler panics.
pub fn spawn_actor_named<A: Actor>(
    actor: A,
    thread_name: impl Into<String>,
) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)> {
    spawn_actor_with_loop(actor, thread_name, |mut actor, inbox, mut ctx| loop {
        let result = catch_unwind(AssertUnwindSafe(|| {
            inbox.dispatch_blocking(&mut actor, &mut ctx)
        }));
        match result {
            Ok(Drained::Idle) => {
                if ctx.is_stop_requested() {
                    break;
                }
            }
            Ok(Drained::Disconnected) => break,
            Err(_) => {
                warn!("actor handler panicked; stopping actor thread");
                break;
            }
        }
    })
}

/// Spawns an actor whose thread runs a caller-supplied loop over its inbox.
pub fn spawn_actor_with_loop<A, F>(
    actor: A,
    thread_name: impl Into<String>,
    run: F,
) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)>
where
    A: Actor,
    F: FnOnce(A, Inbox<A>, ActorContext<A>) + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::unbounded::<Box<dyn Envelope<A>>>();
    let actor_ref = ActorRef { tx };
    let join = thread::Builder::new()
        .name(thread_name.into())
        .spawn(move || run(actor, Inbox { rx }, ActorContext::new()))?;
    Ok((actor_ref, join))
}
