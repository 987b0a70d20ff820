//! Market Meltdown execution layer.
//!
//! This crate contains the phase controller that drives game sessions, the pure phase state
//! machine and voting resolver it delegates to, and the seams it talks to the outside world
//! through: [`Ledger`] for balances, [`Presenter`] for status rendering, [`Scheduler`] for phase
//! deadlines and [`CrashSource`] for the crash draw.
//!
//! ## Concurrency
//! Sessions live in a [`SessionStore`], each behind its own async lock. Actions and deadline
//! handlers for one session are serialized; different sessions never block each other.
//!
//! ## Minimal wiring (example)
//! ```rust,ignore
//! use meltdown_execution::{run_deadlines, Controller, PhaseConfig, RngCrashSource, TokioScheduler};
//!
//! let (scheduler, deadlines) = TokioScheduler::new();
//! let controller = Arc::new(Controller::new(
//!     PhaseConfig::default(),
//!     ledger,
//!     presenter,
//!     scheduler,
//!     RngCrashSource::from_entropy(),
//! ));
//! tokio::spawn(run_deadlines(controller.clone(), deadlines));
//!
//! let session = controller.start(100, None, now_ms).await?;
//! controller.submit(session, participant, ActionKind::Join).await?;
//! ```

pub mod controller;
pub mod ledger;
pub mod phase;
pub mod presenter;
pub mod resolver;
pub mod scheduler;
pub mod store;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use controller::{run_deadlines, Controller, ControllerError, StartError};
pub use ledger::{Ledger, LedgerError};
pub use phase::PhaseConfig;
pub use presenter::{PresentError, Presenter};
pub use resolver::{CrashSource, Resolution, ResolveError, RngCrashSource, Verdict};
pub use scheduler::{Deadline, Scheduler, TokioScheduler};
pub use store::{SessionStore, SharedSession};
