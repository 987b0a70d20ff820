use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

use super::Vote;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum SessionInvariantError {
    #[error("pot must be greater than zero")]
    EmptyPot,
    #[error("pool overflow (pool={pool})")]
    PoolOverflow { pool: u64 },
}

/// Opaque session identifier (creation time in milliseconds, bumped on collision).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<u64>().map(SessionId)
    }
}

/// Participant identifier as issued by the chat platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<u64>().map(ParticipantId)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Registration,
    Investment,
    Voting,
    Terminal,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Registration => "registration",
            Phase::Investment => "investment",
            Phase::Voting => "voting",
            Phase::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub investment: u64,
    pub withdrawn: bool,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            investment: 0,
            withdrawn: false,
        }
    }

    /// Invested and still in the market.
    pub fn is_active(&self) -> bool {
        self.investment > 0 && !self.withdrawn
    }
}

/// One Market Meltdown game instance.
///
/// `players` keeps join order and `votes` keeps submission order; the resolver walks both in
/// that order so settlement is reproducible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub phase: Phase,
    pub pot: u64,
    /// Per-participant stake fixed when registration closes (0 before).
    pub share: u64,
    pub pool: u64,
    pub round: u32,
    pub multiplier: f64,
    pub players: Vec<Participant>,
    pub votes: Vec<(ParticipantId, Vote)>,
    pub crashed: bool,
    /// Where the live status is displayed; owned by the presentation layer.
    pub channel: Option<String>,
}

impl GameSession {
    pub fn new(id: SessionId, pot: u64) -> Result<Self, SessionInvariantError> {
        if pot == 0 {
            return Err(SessionInvariantError::EmptyPot);
        }
        Ok(Self {
            id,
            phase: Phase::Registration,
            pot,
            share: 0,
            pool: 0,
            round: 0,
            multiplier: 1.0,
            players: Vec::new(),
            votes: Vec::new(),
            crashed: false,
            channel: None,
        })
    }

    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.players.iter_mut().find(|player| player.id == id)
    }

    pub fn has_joined(&self, id: ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    pub fn vote_of(&self, id: ParticipantId) -> Option<Vote> {
        self.votes
            .iter()
            .find_map(|(voter, vote)| (*voter == id).then_some(*vote))
    }

    pub fn active_ids(&self) -> Vec<ParticipantId> {
        self.players
            .iter()
            .filter(|player| player.is_active())
            .map(|player| player.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.players.iter().filter(|player| player.is_active()).count()
    }

    pub fn invested_count(&self) -> usize {
        self.players
            .iter()
            .filter(|player| player.investment > 0)
            .count()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// Share each registered participant would receive right now.
    pub fn projected_share(&self) -> u64 {
        compute_share(self.pot, self.players.len()).unwrap_or(self.pot)
    }
}

/// `floor(pot / participants)`, or `None` when nobody registered.
pub fn compute_share(pot: u64, participants: usize) -> Option<u64> {
    if participants == 0 {
        return None;
    }
    Some(pot / participants as u64)
}
