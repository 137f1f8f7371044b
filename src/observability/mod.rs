//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (modid, cmdid, host) on every routing event
//! - Metric updates are cheap and safe to call under the registry lock
//! - Without an installed recorder every metric call is a no-op

pub mod logging;
pub mod metrics;
