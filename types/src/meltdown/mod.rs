//! Market Meltdown session types.
//!
//! Defines the session/participant data model, action identifiers, rejection codes and round
//! reports consumed by the execution layer and clients.

mod action;
mod constants;
mod outcome;
mod session;

pub use action::*;
pub use constants::*;
pub use outcome::*;
pub use session::*;
