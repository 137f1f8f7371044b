//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Control-plane call (pull or report push):
//!     → attempt fails
//!     → backoff.rs (exponential delay + jitter)
//!     → retry until max_attempts, then give up and log
//! ```
//!
//! # Design Decisions
//! - Only the control-plane workers retry; the registry never waits
//! - Jittered backoff keeps shards from retrying in lockstep
//! - A pull that is given up on is recovered by the stale pull sweep

pub mod backoff;
