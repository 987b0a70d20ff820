//! Phase controller.
//!
//! Owns every live session and drives it through registration, investment and voting. Actions
//! arrive through [`Controller::submit`]; phase deadlines arrive through
//! [`Controller::handle_deadline`], normally fed by [`run_deadlines`].
//!
//! Every action and transition runs under the session's lock, including the ledger calls it
//! makes, so a phase validated at the start of an operation still holds when it commits.

use crate::ledger::{Ledger, LedgerError};
use crate::phase::{self, InvestmentClose, PhaseConfig, RegistrationClose};
use crate::presenter::{PresentError, Presenter};
use crate::resolver::{resolve_round, CrashSource, Resolution, ResolveError, Verdict};
use crate::scheduler::{Deadline, Scheduler};
use crate::store::SessionStore;
use futures::FutureExt;
use meltdown_types::meltdown::{
    Accepted, ActionKind, CancelCause, GameSession, ParticipantId, Phase, Rejection, RoundReport,
    SessionId, Termination,
};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("pot must be greater than zero")]
    InvalidPot,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("round resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

pub struct Controller<L, P, S, C> {
    config: PhaseConfig,
    store: Arc<SessionStore>,
    ledger: L,
    presenter: P,
    scheduler: S,
    crash: Mutex<C>,
}

impl<L, P, S, C> Controller<L, P, S, C>
where
    L: Ledger,
    P: Presenter,
    S: Scheduler,
    C: CrashSource + 'static,
{
    pub fn new(config: PhaseConfig, ledger: L, presenter: P, scheduler: S, crash: C) -> Self {
        Self {
            config,
            store: Arc::new(SessionStore::new()),
            ledger,
            presenter,
            scheduler,
            crash: Mutex::new(crash),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// A copy of the live session, if it still exists.
    pub async fn snapshot(&self, id: SessionId) -> Option<GameSession> {
        let shared = self.store.get(id)?;
        let session = shared.lock().await;
        (!session.is_terminal()).then(|| session.clone())
    }

    /// Opens a new session in registration and arms its registration deadline.
    pub async fn start(
        &self,
        pot: u64,
        channel: Option<String>,
        now_ms: u64,
    ) -> Result<SessionId, StartError> {
        let (id, shared) = self
            .store
            .create(pot, channel, now_ms)
            .map_err(|_| StartError::InvalidPot)?;
        let session = shared.lock().await;
        info!(session = %id, pot, "market meltdown started");
        self.arm(&session);
        log_presented(id, self.presenter.render_phase_update(&session).await);
        Ok(id)
    }

    /// Validates and applies one participant action.
    pub async fn submit(
        &self,
        id: SessionId,
        participant: ParticipantId,
        kind: ActionKind,
    ) -> Result<Accepted, Rejection> {
        let shared = self.store.get(id).ok_or(Rejection::SessionNotFound)?;
        let mut session = shared.lock().await;
        if session.is_terminal() {
            return Err(Rejection::SessionNotFound);
        }

        let accepted = match kind {
            ActionKind::Join => {
                phase::check_join(&session, participant)?;
                phase::commit_join(&mut session, participant);
                Accepted::Joined
            }
            ActionKind::Invest => {
                let amount = phase::check_invest(&session, participant)?;
                self.invest(&mut session, participant, amount).await?;
                Accepted::Invested { amount }
            }
            ActionKind::Pump | ActionKind::Dump | ActionKind::Withdraw => {
                let vote = kind.vote().ok_or(Rejection::WrongPhase)?;
                phase::check_vote(&session, participant, vote)?;
                phase::commit_vote(&mut session, participant, vote);
                Accepted::Voted { vote }
            }
        };
        debug!(session = %id, participant = %participant, action = %kind, "action accepted");

        log_presented(id, self.presenter.render_phase_update(&session).await);
        Ok(accepted)
    }

    async fn invest(
        &self,
        session: &mut GameSession,
        participant: ParticipantId,
        amount: u64,
    ) -> Result<(), Rejection> {
        if let Err(err) = self.ledger.debit(participant, amount).await {
            debug!(session = %session.id, participant = %participant, ?err, "investment debit refused");
            return Err(match err {
                LedgerError::InsufficientFunds { .. } => Rejection::InsufficientFunds,
                LedgerError::InvalidAmount | LedgerError::Storage(_) => {
                    Rejection::LedgerUnavailable
                }
            });
        }
        if let Err(err) = phase::commit_investment(session, participant, amount) {
            error!(session = %session.id, participant = %participant, ?err, "investment rejected after debit");
            if let Err(err) = self.ledger.credit(participant, amount).await {
                error!(session = %session.id, participant = %participant, ?err, "failed to refund investment");
            }
            return Err(Rejection::LedgerUnavailable);
        }
        Ok(())
    }

    /// Closes the phase named by `deadline`. Deadlines for a phase or round the session already
    /// left, or for a removed session, are ignored.
    pub async fn on_deadline(&self, deadline: Deadline) -> Result<(), ControllerError> {
        let Some(shared) = self.store.get(deadline.session) else {
            debug!(session = %deadline.session, "deadline for unknown session");
            return Ok(());
        };
        let mut session = shared.lock().await;
        if session.phase != deadline.phase || session.round != deadline.round {
            debug!(
                session = %deadline.session,
                phase = %deadline.phase,
                round = deadline.round,
                "stale deadline"
            );
            return Ok(());
        }

        match deadline.phase {
            Phase::Registration => self.close_registration(&mut session).await,
            Phase::Investment => self.close_investment(&mut session).await,
            Phase::Voting => self.close_round(&mut session).await?,
            Phase::Terminal => {}
        }
        Ok(())
    }

    async fn close_registration(&self, session: &mut GameSession) {
        let share = match phase::close_registration(session) {
            RegistrationClose::Cancel(cause) => {
                self.finish(session, Termination::Cancelled(cause)).await;
                return;
            }
            RegistrationClose::Open { share } => share,
        };

        for participant in session.players.iter().map(|player| player.id) {
            if let Err(err) = self.ledger.credit(participant, share).await {
                error!(session = %session.id, participant = %participant, share, ?err, "failed to credit share");
            }
        }
        phase::enter_investment(session, share);
        info!(
            session = %session.id,
            participants = session.players.len(),
            share,
            "registration closed"
        );
        self.arm(session);
        log_presented(session.id, self.presenter.render_phase_update(session).await);
    }

    async fn close_investment(&self, session: &mut GameSession) {
        if let InvestmentClose::Cancel(cause) = phase::close_investment(session) {
            self.finish(session, Termination::Cancelled(cause)).await;
            return;
        }
        phase::enter_voting(session);
        info!(
            session = %session.id,
            investors = session.invested_count(),
            pool = session.pool,
            "investment closed"
        );
        self.arm(session);
        log_presented(session.id, self.presenter.render_phase_update(session).await);
    }

    async fn close_round(&self, session: &mut GameSession) -> Result<(), ControllerError> {
        let resolution = self.resolve(session)?;
        resolution.apply(session);
        info!(
            session = %session.id,
            round = resolution.report.round,
            pump = resolution.report.tally.pump,
            dump = resolution.report.tally.dump,
            withdraw = resolution.report.tally.withdraw,
            pool = session.pool,
            multiplier = session.multiplier,
            verdict = ?resolution.verdict,
            "round resolved"
        );
        self.settle(session.id, &resolution.report).await;
        log_presented(
            session.id,
            self.presenter
                .render_round_outcome(session, &resolution.report)
                .await,
        );

        match resolution.verdict {
            Verdict::Continue => {
                phase::advance_round(session);
                self.arm(session);
                log_presented(session.id, self.presenter.render_phase_update(session).await);
            }
            Verdict::Crashed => self.finish(session, Termination::Crashed).await,
            Verdict::Completed => self.finish(session, Termination::Completed).await,
        }
        Ok(())
    }

    fn resolve(&self, session: &GameSession) -> Result<Resolution, ResolveError> {
        let mut crash = self.crash.lock().unwrap_or_else(PoisonError::into_inner);
        resolve_round(session, &mut *crash)
    }

    /// Credits the round's payouts in settlement order. Failures are logged, never retried.
    async fn settle(&self, id: SessionId, report: &RoundReport) {
        for payout in report.payouts() {
            if payout.amount == 0 {
                debug!(session = %id, participant = %payout.participant, "nothing to pay out");
                continue;
            }
            if let Err(err) = self.ledger.credit(payout.participant, payout.amount).await {
                error!(
                    session = %id,
                    participant = %payout.participant,
                    amount = payout.amount,
                    ?err,
                    "failed to credit payout"
                );
                continue;
            }
            if payout.experience > 0 {
                match self
                    .ledger
                    .award_experience(payout.participant, payout.experience)
                    .await
                {
                    Ok(level) => debug!(session = %id, participant = %payout.participant, level, "experience awarded"),
                    Err(err) => warn!(session = %id, participant = %payout.participant, ?err, "failed to award experience"),
                }
            }
        }
    }

    /// Terminates `id` after a fault: crashed while voting, cancelled otherwise.
    pub async fn abort(&self, id: SessionId) {
        let Some(shared) = self.store.get(id) else {
            return;
        };
        let mut session = shared.lock().await;
        if session.is_terminal() {
            return;
        }
        let termination = if session.phase == Phase::Voting {
            Termination::Crashed
        } else {
            Termination::Cancelled(CancelCause::Fault)
        };
        self.finish(&mut session, termination).await;
    }

    /// Runs [`Controller::on_deadline`], terminating the session if it fails or panics.
    pub async fn handle_deadline(&self, deadline: Deadline) {
        let outcome = AssertUnwindSafe(self.on_deadline(deadline))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => {
                error!(session = %deadline.session, phase = %deadline.phase, ?err, "deadline failed")
            }
            Err(_) => {
                error!(session = %deadline.session, phase = %deadline.phase, "deadline panicked")
            }
        }
        self.abort(deadline.session).await;
    }

    async fn finish(&self, session: &mut GameSession, termination: Termination) {
        phase::enter_terminal(session, termination == Termination::Crashed);
        self.store.remove(session.id);
        self.scheduler.cancel(session.id);
        info!(
            session = %session.id,
            reason = termination.as_str(),
            round = session.round,
            "session terminated"
        );
        log_presented(
            session.id,
            self.presenter.render_termination(session, termination).await,
        );
    }

    fn arm(&self, session: &GameSession) {
        let deadline = Deadline {
            session: session.id,
            phase: session.phase,
            round: session.round,
        };
        self.scheduler
            .schedule(deadline, self.config.delay_for_phase(session.phase));
    }
}

fn log_presented(id: SessionId, result: Result<(), PresentError>) {
    if let Err(err) = result {
        warn!(session = %id, ?err, "failed to present session");
    }
}

/// Feeds expired deadlines to `controller` until the channel closes.
///
/// Each deadline runs on its own task so a slow settlement never delays other sessions.
pub async fn run_deadlines<L, P, S, C>(
    controller: Arc<Controller<L, P, S, C>>,
    mut deadlines: mpsc::UnboundedReceiver<Deadline>,
) where
    L: Ledger,
    P: Presenter,
    S: Scheduler,
    C: CrashSource + 'static,
{
    while let Some(deadline) = deadlines.recv().await {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            controller.handle_deadline(deadline).await;
        });
    }
    debug!("deadline channel closed");
}
