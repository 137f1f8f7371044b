//! Caller-side API for talking to a running agent.

pub mod client;

pub use client::{AgentClient, ClientConfig, ClientError, RouteUpdate};
