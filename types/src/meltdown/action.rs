use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

use super::{SessionId, ACTION_PREFIX};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Join,
    Invest,
    Pump,
    Dump,
    Withdraw,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Join,
        ActionKind::Invest,
        ActionKind::Pump,
        ActionKind::Dump,
        ActionKind::Withdraw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Join => "join",
            ActionKind::Invest => "invest",
            ActionKind::Pump => "pump",
            ActionKind::Dump => "dump",
            ActionKind::Withdraw => "withdraw",
        }
    }

    /// The round vote this action casts, if it is a voting action.
    pub fn vote(&self) -> Option<Vote> {
        match self {
            ActionKind::Pump => Some(Vote::Pump),
            ActionKind::Dump => Some(Vote::Dump),
            ActionKind::Withdraw => Some(Vote::Withdraw),
            ActionKind::Join | ActionKind::Invest => None,
        }
    }
}

impl FromStr for ActionKind {
    type Err = ActionIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "join" => Ok(ActionKind::Join),
            "invest" => Ok(ActionKind::Invest),
            "pump" => Ok(ActionKind::Pump),
            "dump" => Ok(ActionKind::Dump),
            "withdraw" => Ok(ActionKind::Withdraw),
            other => Err(ActionIdError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Pump,
    Dump,
    Withdraw,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Pump => "pump",
            Vote::Dump => "dump",
            Vote::Withdraw => "withdraw",
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ActionIdError {
    #[error("action id must start with `meltdown_`")]
    MissingPrefix,
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("invalid session id `{0}`")]
    InvalidSession(String),
}

/// Button identifier of the form `meltdown_<action>_<session>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub kind: ActionKind,
    pub session: SessionId,
}

impl ActionId {
    pub fn new(kind: ActionKind, session: SessionId) -> Self {
        Self { kind, session }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ACTION_PREFIX}_{}_{}", self.kind, self.session)
    }
}

impl FromStr for ActionId {
    type Err = ActionIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(3, '_');
        if parts.next() != Some(ACTION_PREFIX) {
            return Err(ActionIdError::MissingPrefix);
        }
        let kind = parts.next().unwrap_or_default().parse::<ActionKind>()?;
        let raw_session = parts.next().unwrap_or_default();
        let session = raw_session
            .parse::<SessionId>()
            .map_err(|_| ActionIdError::InvalidSession(raw_session.to_string()))?;
        Ok(Self { kind, session })
    }
}

/// Why a participant action was refused. Codes are stable and exposed to clients.
#[derive(Clone, Copy, Debug, ThisError, PartialEq, Eq, Hash)]
pub enum Rejection {
    #[error("This game has ended!")]
    SessionNotFound,
    #[error("Invalid action for this phase!")]
    WrongPhase,
    #[error("You didn't join the game!")]
    NotAParticipant,
    #[error("You already did that!")]
    AlreadyActed,
    #[error("You can't vote!")]
    NotEligible,
    #[error("Not enough tokens to invest!")]
    InsufficientFunds,
    #[error("Balances are unavailable, try again later.")]
    LedgerUnavailable,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::SessionNotFound => "session_not_found",
            Rejection::WrongPhase => "wrong_phase",
            Rejection::NotAParticipant => "not_a_participant",
            Rejection::AlreadyActed => "already_acted",
            Rejection::NotEligible => "not_eligible",
            Rejection::InsufficientFunds => "insufficient_funds",
            Rejection::LedgerUnavailable => "ledger_unavailable",
        }
    }
}

impl Serialize for Rejection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// What an accepted action did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Accepted {
    Joined,
    Invested { amount: u64 },
    Voted { vote: Vote },
}

impl fmt::Display for Accepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accepted::Joined => f.write_str("Joined Market Meltdown!"),
            Accepted::Invested { amount } => write!(f, "Invested {amount}!"),
            Accepted::Voted { vote } => write!(f, "Voted to {}!", vote.as_str().to_uppercase()),
        }
    }
}
