//! Client-side load-balancing agent.
//!
//! Callers on the same host ask the agent, over loopback UDP, which backend
//! to use for a `(modid, cmdid)` endpoint and report back how each call went.
//! The agent keeps per-host success/failure accounting, sidelines overloaded
//! hosts, probes them back in, and syncs host lists with a naming service.

pub mod api;
pub mod config;
pub mod control_plane;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod resilience;

pub use api::AgentClient;
pub use config::schema::AgentConfig;
pub use lifecycle::startup::Agent;
pub use lifecycle::{Shutdown, ShutdownSignal};
