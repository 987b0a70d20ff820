//! Test doubles for driving a [`Controller`] without timers, randomness or storage.

use crate::phase::PhaseConfig;
use crate::Controller;
use std::sync::Arc;

pub use crate::ledger::Memory;
pub use crate::presenter::{Recording, Rendered};
pub use crate::resolver::{FixedDraw, Scripted};
pub use crate::scheduler::Manual;

/// Controller wired entirely to in-memory doubles.
pub type MockController = Controller<Arc<Memory>, Arc<Recording>, Arc<Manual>, Scripted>;

/// Handles to the doubles behind a [`MockController`].
pub struct Harness {
    pub controller: Arc<MockController>,
    pub ledger: Arc<Memory>,
    pub presenter: Arc<Recording>,
    pub scheduler: Arc<Manual>,
}

impl Harness {
    /// Creates a controller with default phase durations that replays `draws` for crash checks.
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self::with_config(PhaseConfig::default(), draws)
    }

    pub fn with_config(config: PhaseConfig, draws: impl IntoIterator<Item = f64>) -> Self {
        let ledger = Arc::new(Memory::default());
        let presenter = Arc::new(Recording::default());
        let scheduler = Arc::new(Manual::default());
        let controller = Arc::new(Controller::new(
            config,
            Arc::clone(&ledger),
            Arc::clone(&presenter),
            Arc::clone(&scheduler),
            Scripted::new(draws),
        ));
        Self {
            controller,
            ledger,
            presenter,
            scheduler,
        }
    }
}
