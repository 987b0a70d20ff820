//! Delayed phase deadlines.
//!
//! The controller never sleeps itself. It asks a [`Scheduler`] to hand back a [`Deadline`] once
//! a phase has run its course; whoever receives the deadline feeds it to
//! [`Controller::on_deadline`](crate::Controller::on_deadline). Each deadline names the phase
//! and round it closes, so an expiry that arrives after the session has moved on is ignored.

use meltdown_types::meltdown::{Phase, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// The end of one phase (or voting round) of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Deadline {
    pub session: SessionId,
    pub phase: Phase,
    pub round: u32,
}

/// Cancellable one-shot timers, at most one outstanding per session.
pub trait Scheduler: Send + Sync + 'static {
    /// Deliver `deadline` after `delay`, replacing any pending timer of the same session.
    fn schedule(&self, deadline: Deadline, delay: Duration);

    /// Drop the pending timer of `session`, if any.
    fn cancel(&self, session: SessionId);
}

impl<T: Scheduler> Scheduler for Arc<T> {
    fn schedule(&self, deadline: Deadline, delay: Duration) {
        (**self).schedule(deadline, delay)
    }

    fn cancel(&self, session: SessionId) {
        (**self).cancel(session)
    }
}

/// Wall-clock scheduler backed by `tokio::time::sleep`.
///
/// Expired deadlines are pushed into the channel returned by [`TokioScheduler::new`].
pub struct TokioScheduler {
    sender: mpsc::UnboundedSender<Deadline>,
    timers: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Deadline>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                timers: Mutex::new(HashMap::new()),
            },
            receiver,
        )
    }

    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, deadline: Deadline, delay: Duration) {
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(deadline).is_err() {
                debug!(session = %deadline.session, "deadline receiver dropped");
            }
        });
        let previous = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deadline.session, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel(&self, session: SessionId) {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Scheduler that only records requests; tests fire deadlines by hand.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Manual {
    pending: Mutex<HashMap<SessionId, (Deadline, Duration)>>,
    cancelled: Mutex<Vec<SessionId>>,
}

#[cfg(any(test, feature = "mocks"))]
impl Manual {
    /// The deadline currently armed for `session`.
    pub fn pending(&self, session: SessionId) -> Option<Deadline> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session)
            .map(|(deadline, _)| *deadline)
    }

    pub fn delay(&self, session: SessionId) -> Option<Duration> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session)
            .map(|(_, delay)| *delay)
    }

    /// Remove and return the armed deadline, as if its timer had fired.
    pub fn expire(&self, session: SessionId) -> Option<Deadline> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session)
            .map(|(deadline, _)| deadline)
    }

    pub fn cancelled(&self) -> Vec<SessionId> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Scheduler for Manual {
    fn schedule(&self, deadline: Deadline, delay: Duration) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deadline.session, (deadline, delay));
    }

    fn cancel(&self, session: SessionId) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
    }
}
