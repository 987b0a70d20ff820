/// Prefix shared by every externally exposed action identifier.
pub const ACTION_PREFIX: &str = "meltdown";

/// Default registration window.
pub const REGISTRATION_MS: u64 = 30_000;

/// Default investment window.
pub const INVESTMENT_MS: u64 = 30_000;

/// Default duration of a single voting round.
pub const ROUND_MS: u64 = 60_000;

/// Rounds beyond this number always crash.
pub const MAX_ROUNDS: u32 = 10;

/// First round in which `withdraw` is accepted.
pub const WITHDRAW_MIN_ROUND: u32 = 2;

/// Each dumper takes `pool / DUMP_REWARD_DIVISOR` (10%, rounded down).
pub const DUMP_REWARD_DIVISOR: u64 = 10;

/// Multiplier gained when pumps beat dumps.
pub const PUMP_MULTIPLIER_STEP: f64 = 0.5;

/// Multiplier lost otherwise (no floor).
pub const SLUMP_MULTIPLIER_STEP: f64 = 0.2;

/// Crash chance once dumpers outnumber half of the remaining market.
pub const MAJORITY_DUMP_CRASH_CHANCE: f64 = 0.8;

/// Base crash chance gained per round.
pub const CRASH_CHANCE_PER_ROUND: f64 = 0.05;

/// Ceiling on the per-round base crash chance.
pub const MAX_BASE_CRASH_CHANCE: f64 = 0.3;

/// Payouts award `payout / XP_PER_PAYOUT_DIVISOR` experience.
pub const XP_PER_PAYOUT_DIVISOR: u64 = 10;
