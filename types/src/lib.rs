//! Market Meltdown domain types.
//!
//! Shared by the execution layer (phase controller, voting resolver) and the service that hosts
//! it. Nothing in this crate performs I/O.

pub mod account;
pub mod meltdown;

pub use account::{level_for_xp, Account};
