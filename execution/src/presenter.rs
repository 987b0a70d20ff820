use meltdown_types::meltdown::{GameSession, RoundReport, Termination};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[cfg(any(test, feature = "mocks"))]
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresentError {
    #[error("status delivery failed: {0}")]
    Delivery(String),
}

/// Renders session state for players. Best effort: the controller logs failures and carries on.
pub trait Presenter: Send + Sync + 'static {
    fn render_phase_update(
        &self,
        session: &GameSession,
    ) -> impl Future<Output = Result<(), PresentError>> + Send;

    fn render_round_outcome(
        &self,
        session: &GameSession,
        report: &RoundReport,
    ) -> impl Future<Output = Result<(), PresentError>> + Send;

    fn render_termination(
        &self,
        session: &GameSession,
        termination: Termination,
    ) -> impl Future<Output = Result<(), PresentError>> + Send;
}

impl<T: Presenter> Presenter for Arc<T> {
    fn render_phase_update(
        &self,
        session: &GameSession,
    ) -> impl Future<Output = Result<(), PresentError>> + Send {
        (**self).render_phase_update(session)
    }

    fn render_round_outcome(
        &self,
        session: &GameSession,
        report: &RoundReport,
    ) -> impl Future<Output = Result<(), PresentError>> + Send {
        (**self).render_round_outcome(session, report)
    }

    fn render_termination(
        &self,
        session: &GameSession,
        termination: Termination,
    ) -> impl Future<Output = Result<(), PresentError>> + Send {
        (**self).render_termination(session, termination)
    }
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Debug, PartialEq)]
pub enum Rendered {
    Phase(GameSession),
    Round(GameSession, RoundReport),
    Terminated(GameSession, Termination),
}

/// Presenter that records every render, optionally failing them all.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Recording {
    rendered: Mutex<Vec<Rendered>>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "mocks"))]
impl Recording {
    pub fn rendered(&self) -> Vec<Rendered> {
        self.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn terminations(&self) -> Vec<Termination> {
        self.rendered()
            .into_iter()
            .filter_map(|rendered| match rendered {
                Rendered::Terminated(_, termination) => Some(termination),
                _ => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<RoundReport> {
        self.rendered()
            .into_iter()
            .filter_map(|rendered| match rendered {
                Rendered::Round(_, report) => Some(report),
                _ => None,
            })
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn record(&self, rendered: Rendered) -> Result<(), PresentError> {
        self.rendered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rendered);
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PresentError::Delivery("status message deleted".to_string()));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Presenter for Recording {
    async fn render_phase_update(&self, session: &GameSession) -> Result<(), PresentError> {
        self.record(Rendered::Phase(session.clone()))
    }

    async fn render_round_outcome(
        &self,
        session: &GameSession,
        report: &RoundReport,
    ) -> Result<(), PresentError> {
        self.record(Rendered::Round(session.clone(), report.clone()))
    }

    async fn render_termination(
        &self,
        session: &GameSession,
        termination: Termination,
    ) -> Result<(), PresentError> {
        self.record(Rendered::Terminated(session.clone(), termination))
    }
}
