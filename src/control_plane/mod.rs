//! Control-plane subsystem.
//!
//! # Data Flow
//! ```text
//! Registry (under no lock):
//!     → gateway.rs (enqueue PullRequest / ReportStatus, never wait)
//!
//! Pull worker (puller.rs):
//!     PullRequest → GET naming service → shards.apply_update
//!
//! Report worker (reporter.rs):
//!     ReportStatus → POST reporting service
//! ```
//!
//! # Design Decisions
//! - Unbounded queues: enqueue must never block a caller
//! - One task per message so a slow endpoint does not hold up the rest
//! - Sources and sinks are traits so workers run against in-memory fakes

pub mod gateway;
pub mod puller;
pub mod reporter;
pub mod types;

pub use gateway::ControlPlane;
pub use puller::{HttpRouteSource, PullWorker, RouteSource};
pub use reporter::{HttpReportSink, ReportSink, ReportWorker};
pub use types::{GatewayError, PullRequest, ReportStatus};
