//! End-of-round resolution.
//!
//! [`resolve_round`] turns the votes of one round into a [`Resolution`]: payouts owed, the market
//! move, the crash probability and the verdict. It never touches the ledger. The only impure
//! input is the crash draw, taken from a [`CrashSource`].

use meltdown_types::meltdown::{
    GameSession, MarketMove, ParticipantId, Payout, PayoutKind, Phase, RoundReport,
    SessionInvariantError, Tally, Vote, CRASH_CHANCE_PER_ROUND, DUMP_REWARD_DIVISOR,
    MAJORITY_DUMP_CRASH_CHANCE, MAX_BASE_CRASH_CHANCE, MAX_ROUNDS, PUMP_MULTIPLIER_STEP,
    SLUMP_MULTIPLIER_STEP, XP_PER_PAYOUT_DIVISOR,
};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashSet;
use thiserror::Error;

/// Uniform draws in `[0, 1)` deciding whether the market crashes.
pub trait CrashSource: Send {
    fn draw(&mut self) -> f64;
}

/// [`CrashSource`] backed by a `rand` generator.
pub struct RngCrashSource<R: RngCore + Send> {
    rng: R,
}

impl<R: RngCore + Send> RngCrashSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngCrashSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Reproducible draws, for replaying a session.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore + Send> CrashSource for RngCrashSource<R> {
    fn draw(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Always returns the same draw.
#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Copy, Debug)]
pub struct FixedDraw(pub f64);

#[cfg(any(test, feature = "mocks"))]
impl CrashSource for FixedDraw {
    fn draw(&mut self) -> f64 {
        self.0
    }
}

/// Replays a list of draws, then repeats the last one (or `1.0` when empty).
#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Debug, Default)]
pub struct Scripted {
    draws: std::collections::VecDeque<f64>,
    last: Option<f64>,
}

#[cfg(any(test, feature = "mocks"))]
impl Scripted {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            last: None,
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
impl CrashSource for Scripted {
    fn draw(&mut self) -> f64 {
        if let Some(draw) = self.draws.pop_front() {
            self.last = Some(draw);
        }
        self.last.unwrap_or(1.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Invariant(#[from] SessionInvariantError),
    #[error("rounds resolve only during voting (phase={0})")]
    NotVoting(Phase),
}

/// What happens to the session after a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Crashed,
    /// Every participant left the market before it crashed.
    Completed,
}

/// The outcome of one round, not yet applied to the session.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub report: RoundReport,
    pub verdict: Verdict,
    /// Participants leaving the market this round, dumpers and withdrawers alike.
    pub exits: Vec<ParticipantId>,
}

impl Resolution {
    /// Writes the round's effects into `session`. Ledger settlement is the caller's job.
    pub fn apply(&self, session: &mut GameSession) {
        for id in &self.exits {
            if let Some(player) = session.participant_mut(*id) {
                player.withdrawn = true;
            }
        }
        session.pool = self.report.pool;
        session.multiplier = self.report.multiplier;
        session.votes.clear();
        if self.verdict == Verdict::Crashed {
            session.crashed = true;
        }
    }
}

/// Probability that the market crashes after this round.
///
/// `active` is the number of participants still in the market once exits are removed.
pub fn crash_chance(dump_votes: u32, active: usize, round: u32) -> f64 {
    if f64::from(dump_votes) > active as f64 / 2.0 {
        return MAJORITY_DUMP_CRASH_CHANCE;
    }
    (CRASH_CHANCE_PER_ROUND * f64::from(round)).min(MAX_BASE_CRASH_CHANCE)
}

/// A dumper's cut of the current pool.
pub fn dump_reward(pool: u64) -> u64 {
    pool / DUMP_REWARD_DIVISOR
}

/// `floor(investment * multiplier)`, clamped at zero for non-positive multipliers.
pub fn withdraw_payout(investment: u64, multiplier: f64) -> u64 {
    let value = (investment as f64 * multiplier).floor();
    if value <= 0.0 || value.is_nan() {
        return 0;
    }
    // Float-to-int casts saturate.
    value as u64
}

pub fn experience_for(amount: u64) -> u64 {
    amount / XP_PER_PAYOUT_DIVISOR
}

/// Resolves the current voting round of `session`.
pub fn resolve_round(
    session: &GameSession,
    crash: &mut impl CrashSource,
) -> Result<Resolution, ResolveError> {
    if session.phase != Phase::Voting {
        return Err(ResolveError::NotVoting(session.phase));
    }

    let mut tally = Tally::default();
    let mut counted = HashSet::new();
    let mut dumpers = Vec::new();
    let mut withdrawers = Vec::new();
    for (voter, vote) in &session.votes {
        let Some(player) = session.participant(*voter).filter(|player| player.is_active()) else {
            continue;
        };
        // First vote wins.
        if !counted.insert(player.id) {
            continue;
        }
        match vote {
            Vote::Pump => tally.pump += 1,
            Vote::Dump => {
                tally.dump += 1;
                dumpers.push(player.id);
            }
            Vote::Withdraw => {
                tally.withdraw += 1;
                withdrawers.push((player.id, player.investment));
            }
        }
    }

    // Withdrawals do not draw from the pool.
    let withdrawn: Vec<Payout> = withdrawers
        .iter()
        .map(|(participant, investment)| {
            let amount = withdraw_payout(*investment, session.multiplier);
            Payout {
                participant: *participant,
                kind: PayoutKind::Withdraw,
                amount,
                experience: experience_for(amount),
            }
        })
        .collect();

    let mut pool = session.pool;
    let dumped: Vec<Payout> = dumpers
        .iter()
        .map(|participant| {
            let amount = dump_reward(pool);
            pool -= amount;
            Payout {
                participant: *participant,
                kind: PayoutKind::Dump,
                amount,
                experience: experience_for(amount),
            }
        })
        .collect();

    let mut multiplier = session.multiplier;
    let market = if tally.pump > tally.dump {
        pool = pool
            .checked_mul(2)
            .ok_or(SessionInvariantError::PoolOverflow { pool })?;
        multiplier += PUMP_MULTIPLIER_STEP;
        MarketMove::Pumped
    } else {
        multiplier -= SLUMP_MULTIPLIER_STEP;
        MarketMove::Slumped
    };

    let exits: Vec<ParticipantId> = withdrawn
        .iter()
        .chain(dumped.iter())
        .map(|payout| payout.participant)
        .collect();
    let remaining = session.active_count().saturating_sub(exits.len());
    let chance = crash_chance(tally.dump, remaining, session.round);

    let verdict = if session.round > MAX_ROUNDS {
        Verdict::Crashed
    } else if remaining == 0 {
        Verdict::Completed
    } else if crash.draw() < chance {
        Verdict::Crashed
    } else {
        Verdict::Continue
    };

    Ok(Resolution {
        report: RoundReport {
            round: session.round,
            tally,
            dumped,
            withdrawn,
            market,
            crash_chance: chance,
            pool,
            multiplier,
        },
        verdict,
        exits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase;
    use meltdown_types::meltdown::SessionId;
    use proptest::prelude::*;

    const ALICE: ParticipantId = ParticipantId(1);
    const BOB: ParticipantId = ParticipantId(2);
    const CAROL: ParticipantId = ParticipantId(3);

    fn voting(players: &[(ParticipantId, u64)]) -> GameSession {
        let mut session = GameSession::new(SessionId(1), 100).unwrap();
        for (id, _) in players {
            phase::commit_join(&mut session, *id);
        }
        phase::enter_investment(&mut session, 0);
        for (id, investment) in players {
            if *investment > 0 {
                phase::commit_investment(&mut session, *id, *investment).unwrap();
            }
        }
        phase::enter_voting(&mut session);
        session
    }

    #[test]
    fn test_two_player_game_completes() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        assert_eq!(session.pool, 100);

        phase::commit_vote(&mut session, ALICE, Vote::Pump);
        phase::commit_vote(&mut session, BOB, Vote::Pump);
        let first = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert_eq!(first.verdict, Verdict::Continue);
        assert_eq!(first.report.market, MarketMove::Pumped);
        first.apply(&mut session);
        phase::advance_round(&mut session);
        assert_eq!(session.pool, 200);
        assert_eq!(session.multiplier, 1.5);
        assert_eq!(session.round, 2);

        phase::commit_vote(&mut session, ALICE, Vote::Dump);
        phase::commit_vote(&mut session, BOB, Vote::Withdraw);
        let second = resolve_round(&session, &mut FixedDraw(0.0)).unwrap();
        assert_eq!(second.verdict, Verdict::Completed);
        assert_eq!(
            second.report.dumped,
            vec![Payout {
                participant: ALICE,
                kind: PayoutKind::Dump,
                amount: 20,
                experience: 2,
            }]
        );
        assert_eq!(
            second.report.withdrawn,
            vec![Payout {
                participant: BOB,
                kind: PayoutKind::Withdraw,
                amount: 75,
                experience: 7,
            }]
        );
        second.apply(&mut session);
        assert_eq!(session.pool, 180);
        assert_eq!(session.active_count(), 0);
        assert!(!session.crashed);
    }

    #[test]
    fn test_dumps_drain_pool_sequentially() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50), (CAROL, 100)]);
        phase::commit_vote(&mut session, BOB, Vote::Dump);
        phase::commit_vote(&mut session, ALICE, Vote::Dump);
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();

        let amounts: Vec<_> = resolution
            .report
            .dumped
            .iter()
            .map(|payout| (payout.participant, payout.amount))
            .collect();
        assert_eq!(amounts, vec![(BOB, 20), (ALICE, 18)]);
        assert_eq!(resolution.report.pool, 162);
        assert_eq!(resolution.exits, vec![BOB, ALICE]);
        // Two dumps against one remaining participant.
        assert_eq!(resolution.report.crash_chance, MAJORITY_DUMP_CRASH_CHANCE);
    }

    #[test]
    fn test_withdraw_leaves_pool_untouched() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.round = 2;
        session.multiplier = 2.0;
        phase::commit_vote(&mut session, ALICE, Vote::Withdraw);
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert_eq!(resolution.report.withdrawn[0].amount, 100);
        assert_eq!(resolution.report.pool, 100);
        assert!((resolution.report.multiplier - 1.8).abs() < 1e-9);
        assert_eq!(resolution.verdict, Verdict::Continue);
    }

    #[test]
    fn test_inactive_votes_are_ignored() {
        let mut session = voting(&[(ALICE, 50), (BOB, 0), (CAROL, 50)]);
        session.participant_mut(CAROL).unwrap().withdrawn = true;
        session.votes = vec![
            (ALICE, Vote::Pump),
            (BOB, Vote::Dump),
            (CAROL, Vote::Dump),
            (ParticipantId(99), Vote::Dump),
        ];
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert_eq!(
            resolution.report.tally,
            Tally {
                pump: 1,
                dump: 0,
                withdraw: 0
            }
        );
        assert!(resolution.exits.is_empty());
        assert_eq!(resolution.report.market, MarketMove::Pumped);
    }

    #[test]
    fn test_repeated_votes_count_once() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.votes = vec![(ALICE, Vote::Dump), (ALICE, Vote::Dump)];
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert_eq!(resolution.report.tally.dump, 1);
        assert_eq!(resolution.exits, vec![ALICE]);
        assert_eq!(resolution.report.pool, 90);
    }

    #[test]
    fn test_tie_slumps_market() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50), (CAROL, 50)]);
        phase::commit_vote(&mut session, ALICE, Vote::Pump);
        phase::commit_vote(&mut session, BOB, Vote::Dump);
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert_eq!(resolution.report.market, MarketMove::Slumped);
        assert!((resolution.report.multiplier - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_round_limit_forces_crash() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.round = MAX_ROUNDS + 1;
        phase::commit_vote(&mut session, ALICE, Vote::Pump);
        phase::commit_vote(&mut session, BOB, Vote::Pump);
        let resolution = resolve_round(&session, &mut FixedDraw(0.999)).unwrap();
        assert_eq!(resolution.verdict, Verdict::Crashed);

        resolution.apply(&mut session);
        assert!(session.crashed);
    }

    #[test]
    fn test_draw_below_chance_crashes() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.round = 4;
        // 0.05 * 4
        let crashed = resolve_round(&session, &mut FixedDraw(0.19)).unwrap();
        assert_eq!(crashed.verdict, Verdict::Crashed);
        let survived = resolve_round(&session, &mut FixedDraw(0.21)).unwrap();
        assert_eq!(survived.verdict, Verdict::Continue);
    }

    #[test]
    fn test_multiplier_has_no_floor() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.round = 2;
        session.multiplier = -0.2;
        phase::commit_vote(&mut session, ALICE, Vote::Withdraw);
        let resolution = resolve_round(&session, &mut FixedDraw(0.99)).unwrap();
        assert!((resolution.report.multiplier + 0.4).abs() < 1e-9);
        assert_eq!(resolution.report.withdrawn[0].amount, 0);
        assert_eq!(resolution.report.withdrawn[0].experience, 0);
        assert_eq!(resolution.exits, vec![ALICE]);
    }

    #[test]
    fn test_pool_overflow_is_an_error() {
        let mut session = voting(&[(ALICE, 50), (BOB, 50)]);
        session.pool = u64::MAX;
        phase::commit_vote(&mut session, ALICE, Vote::Pump);
        assert!(matches!(
            resolve_round(&session, &mut FixedDraw(0.99)),
            Err(ResolveError::Invariant(SessionInvariantError::PoolOverflow { .. }))
        ));
    }

    #[test]
    fn test_resolve_requires_voting() {
        let session = GameSession::new(SessionId(1), 100).unwrap();
        assert_eq!(
            resolve_round(&session, &mut FixedDraw(0.5)),
            Err(ResolveError::NotVoting(Phase::Registration))
        );
    }

    #[test]
    fn test_scripted_draws_repeat_last() {
        let mut draws = Scripted::new([0.1, 0.7]);
        assert_eq!(draws.draw(), 0.1);
        assert_eq!(draws.draw(), 0.7);
        assert_eq!(draws.draw(), 0.7);
        assert_eq!(Scripted::default().draw(), 1.0);
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut first = RngCrashSource::seeded(7);
        let mut second = RngCrashSource::seeded(7);
        for _ in 0..16 {
            let draw = first.draw();
            assert!((0.0..1.0).contains(&draw));
            assert_eq!(draw, second.draw());
        }
    }

    proptest! {
        #[test]
        fn prop_crash_chance_bounds(dump in 0u32..50, active in 0usize..100, round in 0u32..20) {
            let chance = crash_chance(dump, active, round);
            if f64::from(dump) > active as f64 / 2.0 {
                prop_assert_eq!(chance, MAJORITY_DUMP_CRASH_CHANCE);
            } else {
                prop_assert_eq!(chance, (0.05 * f64::from(round)).min(0.3));
            }
        }

        #[test]
        fn prop_dump_reward_is_a_tenth(pool in any::<u64>()) {
            let reward = dump_reward(pool);
            prop_assert!(reward <= pool);
            prop_assert_eq!(reward, pool / 10);
        }
    }
}
