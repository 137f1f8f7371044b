//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Caller query (modid, cmdid)
//!     → shards.rs (pick the owning registry)
//!     → registry.rs (lock, find or create the endpoint)
//!     → endpoint.rs (round-robin over idle hosts, probe overloaded ones)
//!     → host address, "all overloaded", or "not yet available"
//!
//! Caller report (host, success/failure)
//!     → endpoint.rs (update counters, move host between rotations)
//!     → host.rs (virtual/real/streak counters, window timers)
//!     → periodic health report pushed to the control plane
//! ```
//!
//! # Design Decisions
//! - Selection and reporting never block on the network
//! - Hosts are only ever in one of two rotations: idle or overloaded
//! - Time comes from a `Clock` so every transition is testable
//! - Route tables are snapshotted to disk for crash recovery

pub mod clock;
pub mod endpoint;
pub mod host;
pub mod policy;
pub mod registry;
pub mod rotation;
pub mod shards;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::{EndpointKey, HostLookup, Outcome};
pub use host::HostAddr;
pub use policy::LbPolicy;
pub use registry::{BatchResult, CallReport, RouteDelta, RouteRegistry};
pub use shards::RegistryShards;
