//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics → shards + snapshot recovery
//!         → control-plane workers → maintenance → heartbeat → UDP front-ends
//!
//! Running:
//!     maintenance.rs (clear stale pulls, persist routes)
//!     heartbeat.rs (liveness stamp for callers)
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → latched signal → tasks exit → final persist
//! ```
//!
//! # Design Decisions
//! - Ordered startup: state first, then workers, then listeners
//! - Routes are persisted once more after every task has stopped
//! - Any startup error is fatal

pub mod heartbeat;
pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
