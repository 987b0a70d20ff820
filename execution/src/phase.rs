//! Phase state machine for Market Meltdown sessions.
//!
//! Everything here is pure: validation of participant actions, the mutations they commit, and
//! the decisions taken when a phase deadline expires. Timing and I/O live in
//! [`Controller`](crate::Controller).
//!
//! ## Phases
//!
//! 1. **Registration** - players join; on expiry the pot is split into equal shares
//! 2. **Investment** - joined players invest their share into the pool
//! 3. **Voting** - repeating rounds of pump/dump/withdraw, resolved by [`crate::resolver`]
//! 4. **Terminal** - the session has left the store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meltdown_execution::phase::{self, RegistrationClose};
//!
//! phase::check_join(&session, player)?;
//! phase::commit_join(&mut session, player);
//!
//! match phase::close_registration(&session) {
//!     RegistrationClose::Open { share } => phase::enter_investment(&mut session, share),
//!     RegistrationClose::Cancel(cause) => { /* terminate */ }
//! }
//! ```

use meltdown_types::meltdown::{
    compute_share, CancelCause, GameSession, Participant, ParticipantId, Phase, Rejection,
    SessionInvariantError, Vote, INVESTMENT_MS, REGISTRATION_MS, ROUND_MS, WITHDRAW_MIN_ROUND,
};
use std::time::Duration;

/// Phase durations in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Duration of the registration phase in milliseconds.
    pub registration_ms: u64,
    /// Duration of the investment phase in milliseconds.
    pub investment_ms: u64,
    /// Duration of each voting round in milliseconds.
    pub round_ms: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            registration_ms: REGISTRATION_MS,
            investment_ms: INVESTMENT_MS,
            round_ms: ROUND_MS,
        }
    }
}

impl PhaseConfig {
    pub fn new(registration_ms: u64, investment_ms: u64, round_ms: u64) -> Self {
        Self {
            registration_ms,
            investment_ms,
            round_ms,
        }
    }

    /// Validate the configuration (all durations must be > 0).
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.registration_ms == 0 {
            return Err("registration_ms must be greater than zero");
        }
        if self.investment_ms == 0 {
            return Err("investment_ms must be greater than zero");
        }
        if self.round_ms == 0 {
            return Err("round_ms must be greater than zero");
        }
        Ok(())
    }

    /// Get the duration for a specific phase.
    pub fn duration_for_phase(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Registration => self.registration_ms,
            Phase::Investment => self.investment_ms,
            Phase::Voting => self.round_ms,
            Phase::Terminal => 0,
        }
    }

    pub fn delay_for_phase(&self, phase: Phase) -> Duration {
        Duration::from_millis(self.duration_for_phase(phase))
    }
}

/// Decision taken when registration expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationClose {
    Cancel(CancelCause),
    /// Credit every participant `share` and open investment.
    Open { share: u64 },
}

/// Decision taken when investment expires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvestmentClose {
    Cancel(CancelCause),
    StartVoting,
}

pub fn close_registration(session: &GameSession) -> RegistrationClose {
    match compute_share(session.pot, session.players.len()) {
        None => RegistrationClose::Cancel(CancelCause::NoParticipants),
        Some(0) => RegistrationClose::Cancel(CancelCause::PotTooSmall),
        Some(share) => RegistrationClose::Open { share },
    }
}

pub fn close_investment(session: &GameSession) -> InvestmentClose {
    if session.invested_count() == 0 {
        return InvestmentClose::Cancel(CancelCause::NoInvestments);
    }
    InvestmentClose::StartVoting
}

pub fn enter_investment(session: &mut GameSession, share: u64) {
    session.share = share;
    session.phase = Phase::Investment;
}

pub fn enter_voting(session: &mut GameSession) {
    session.phase = Phase::Voting;
    session.round = 1;
    session.votes.clear();
}

/// Moves a surviving session into its next voting round.
pub fn advance_round(session: &mut GameSession) {
    session.round = session.round.saturating_add(1);
    session.votes.clear();
}

pub fn enter_terminal(session: &mut GameSession, crashed: bool) {
    session.phase = Phase::Terminal;
    session.crashed = session.crashed || crashed;
}

pub fn check_join(session: &GameSession, participant: ParticipantId) -> Result<(), Rejection> {
    if session.phase != Phase::Registration {
        return Err(Rejection::WrongPhase);
    }
    if session.has_joined(participant) {
        return Err(Rejection::AlreadyActed);
    }
    Ok(())
}

/// Returns the amount to debit.
pub fn check_invest(session: &GameSession, participant: ParticipantId) -> Result<u64, Rejection> {
    if session.phase != Phase::Investment {
        return Err(Rejection::WrongPhase);
    }
    let player = session
        .participant(participant)
        .ok_or(Rejection::NotAParticipant)?;
    if player.investment > 0 {
        return Err(Rejection::AlreadyActed);
    }
    Ok(session.share)
}

pub fn check_vote(
    session: &GameSession,
    participant: ParticipantId,
    vote: Vote,
) -> Result<(), Rejection> {
    if session.phase != Phase::Voting {
        return Err(Rejection::WrongPhase);
    }
    if vote == Vote::Withdraw && session.round < WITHDRAW_MIN_ROUND {
        return Err(Rejection::WrongPhase);
    }
    let player = session
        .participant(participant)
        .ok_or(Rejection::NotAParticipant)?;
    if !player.is_active() {
        return Err(Rejection::NotEligible);
    }
    if session.vote_of(participant).is_some() {
        return Err(Rejection::AlreadyActed);
    }
    Ok(())
}

pub fn commit_join(session: &mut GameSession, participant: ParticipantId) {
    session.players.push(Participant::new(participant));
}

pub fn commit_investment(
    session: &mut GameSession,
    participant: ParticipantId,
    amount: u64,
) -> Result<(), SessionInvariantError> {
    let pool = session
        .pool
        .checked_add(amount)
        .ok_or(SessionInvariantError::PoolOverflow { pool: session.pool })?;
    if let Some(player) = session.participant_mut(participant) {
        player.investment = amount;
        session.pool = pool;
    }
    Ok(())
}

pub fn commit_vote(session: &mut GameSession, participant: ParticipantId, vote: Vote) {
    session.votes.push((participant, vote));
}
