//! Realtime timer service.
//!
//! A [`Timer`] wraps one dedicated deadline thread. On expiry the thread
//! only runs the pre-supplied firing closure, which enqueues a pre-supplied
//! event into the owning actor's mailbox; it never touches actor state.
//! Re-arming cancels any pending firing, so at most one firing per timer is
//! ever in flight.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{never, Receiver, Sender};

use crate::actor::{Actor, ActorRef, Event, Handler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once, `dt` from now.
    Relative(Duration),
    /// Fire once, at `t`.
    Absolute(Instant),
    /// Fire every `dt`, first firing `dt` from now.
    Periodic(Duration),
}

enum TimerCtrl {
    Arm(Schedule),
    Disarm,
    Shutdown,
}

#[derive(Default)]
struct TimerShared {
    deadline: Option<Instant>,
}

pub struct Timer {
    ctrl_tx: Sender<TimerCtrl>,
    shared: Arc<Mutex<TimerShared>>,
    join: Option<JoinHandle<()>>,
}

impl Timer {
    /// Creates a disarmed timer whose expiries run `fire`.
    pub fn new(
        name: impl Into<String>,
        fire: impl Fn() + Send + 'static,
    ) -> std::io::Result<Self> {
        let (ctrl_tx, ctrl_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Mutex::new(TimerShared::default()));
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_timer_loop(ctrl_rx, thread_shared, fire))?;
        Ok(Self {
            ctrl_tx,
            shared,
            join: Some(join),
        })
    }

    /// Creates a disarmed timer that enqueues `event` into `actor` on expiry.
    pub fn for_actor<A, E>(
        name: impl Into<String>,
        actor: ActorRef<A>,
        event: E,
    ) -> std::io::Result<Self>
    where
        A: Actor + Handler<E>,
        E: Event<Response = ()> + Clone,
    {
        Self::new(name, move || {
            let _ = actor.notify(event.clone());
        })
    }

    /// Arms (or re-arms) the timer. A pending firing is cancelled.
    pub fn arm(&self, schedule: Schedule) {
        let deadline = match schedule {
            Schedule::Relative(dt) | Schedule::Periodic(dt) => Instant::now() + dt,
            Schedule::Absolute(t) => t,
        };
        self.shared
            .lock()
            .expect("timer state mutex poisoned")
            .deadline = Some(deadline);
        let _ = self.ctrl_tx.send(TimerCtrl::Arm(schedule));
    }

    pub fn disarm(&self) {
        self.shared
            .lock()
            .expect("timer state mutex poisoned")
            .deadline = None;
        let _ = self.ctrl_tx.send(TimerCtrl::Disarm);
    }

    /// Non-suspending read of the time left until the next firing.
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self
            .shared
            .lock()
            .expect("timer state mutex poisoned")
            .deadline?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Non-suspending read of the service clock.
    pub fn now() -> Instant {
        Instant::now()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let _ = self.ctrl_tx.send(TimerCtrl::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_timer_loop(
    ctrl_rx: Receiver<TimerCtrl>,
    shared: Arc<Mutex<TimerShared>>,
    fire: impl Fn(),
) {
    // (deadline, period) of the current arming; None while disarmed.
    let mut armed: Option<(Instant, Option<Duration>)> = None;

    loop {
        let deadline_rx = match armed {
            Some((at, _)) => crossbeam_channel::at(at),
            None => never(),
        };

        crossbeam_channel::select! {
            recv(ctrl_rx) -> msg => match msg {
                Ok(TimerCtrl::Arm(schedule)) => {
                    armed = Some(resolve(schedule));
                }
                Ok(TimerCtrl::Disarm) => {
                    armed = None;
                }
                Ok(TimerCtrl::Shutdown) | Err(_) => return,
            },
            recv(deadline_rx) -> _ => {
                // A re-arm or disarm enqueued before the deadline hit wins
                // over the expiry; drain control first.
                let mut superseded = false;
                while let Ok(msg) = ctrl_rx.try_recv() {
                    superseded = true;
                    match msg {
                        TimerCtrl::Arm(schedule) => armed = Some(resolve(schedule)),
                        TimerCtrl::Disarm => armed = None,
                        TimerCtrl::Shutdown => return,
                    }
                }
                if superseded {
                    continue;
                }

                let (at, period) = armed.take().expect("expiry without arming");
                fire();
                let mut state = shared.lock().expect("timer state mutex poisoned");
                match period {
                    Some(dt) => {
                        let next = at + dt;
                        state.deadline = Some(next);
                        armed = Some((next, Some(dt)));
                    }
                    None => state.deadline = None,
                }
            }
        }
    }
}

fn resolve(schedule: Schedule) -> (Instant, Option<Duration>) {
    match schedule {
        Schedule::Relative(dt) => (Instant::now() + dt, None),
        Schedule::Absolute(t) => (t, None),
        Schedule::Periodic(dt) => (Instant::now() + dt, Some(dt)),
    }
}
