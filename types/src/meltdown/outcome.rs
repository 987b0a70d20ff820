use serde::Serialize;

use super::ParticipantId;

/// Counted votes of active participants for one round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub pump: u32,
    pub dump: u32,
    pub withdraw: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Dump,
    Withdraw,
}

/// Tokens owed to a participant leaving the market this round.
///
/// `amount` may be zero (tiny pool, non-positive multiplier); zero payouts are never credited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub participant: ParticipantId,
    pub kind: PayoutKind,
    pub amount: u64,
    pub experience: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketMove {
    /// Pumps beat dumps: pool doubled, multiplier raised.
    Pumped,
    /// Multiplier lowered, pool untouched.
    Slumped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    NoParticipants,
    NoInvestments,
    /// `floor(pot / participants)` rounded down to nothing.
    PotTooSmall,
    /// An internal fault interrupted a phase transition.
    Fault,
}

/// How a session left the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "cause", rename_all = "snake_case")]
pub enum Termination {
    Cancelled(CancelCause),
    Crashed,
    Completed,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Cancelled(_) => "cancelled",
            Termination::Crashed => "crashed",
            Termination::Completed => "completed",
        }
    }
}

/// Everything the presentation layer needs about a resolved round.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub tally: Tally,
    pub dumped: Vec<Payout>,
    pub withdrawn: Vec<Payout>,
    pub market: MarketMove,
    pub crash_chance: f64,
    pub pool: u64,
    pub multiplier: f64,
}

impl RoundReport {
    /// Payouts in settlement order (withdrawals first, then dumps).
    pub fn payouts(&self) -> impl Iterator<Item = &Payout> {
        self.withdrawn.iter().chain(self.dumped.iter())
    }
}
