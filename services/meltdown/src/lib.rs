//! Market Meltdown service.
//!
//! Hosts the execution layer behind HTTP and WebSocket: admins open sessions, players press
//! buttons through `POST /interactions` (or the `/ws` socket), and every state change is pushed
//! to `/ws` subscribers as a status panel. Balances persist in a JSON file.

pub mod api;
pub mod config;
pub mod ledger;
pub mod presenter;

pub use api::{router, AppState, ServiceController};
pub use config::ServiceConfig;
pub use ledger::JsonLedger;
pub use presenter::{BroadcastPresenter, OutboundEvent, Panel};
