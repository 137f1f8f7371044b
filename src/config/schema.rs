//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the agent.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::load_balancer::policy::LbPolicy;
use crate::resilience::backoff::RetryPolicy;

/// Root configuration for the agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Sharding and identity.
    pub agent: AgentSection,

    /// UDP front-end addresses.
    pub listener: ListenerConfig,

    /// Overload detection and selection tuning.
    pub lb: LbPolicy,

    /// Naming and reporting services.
    pub control_plane: ControlPlaneConfig,

    /// Periodic sweeps and persistence.
    pub maintenance: MaintenanceConfig,

    /// Liveness file for callers.
    pub heartbeat: HeartbeatConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    /// Number of independent registries.
    pub shards: usize,

    /// Address reported upstream as the caller. Detected when absent.
    pub caller_ip: Option<Ipv4Addr>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            shards: 3,
            caller_ip: None,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface the UDP sockets bind to.
    pub host: Ipv4Addr,

    /// Shard `i` listens on `base_port + i`.
    pub base_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            base_port: 8888,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Base URL of the naming service.
    pub naming_url: String,

    /// Base URL of the reporting service.
    pub reporter_url: String,

    pub request_timeout_secs: u64,

    /// Attempts per call, including the first.
    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,
}

impl ControlPlaneConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            naming_url: "http://127.0.0.1:7777".to_string(),
            reporter_url: "http://127.0.0.1:7778".to_string(),
            request_timeout_secs: 3,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often outstanding pull flags are cleared.
    pub clear_pulling_interval_secs: u64,

    /// How often route snapshots are written.
    pub persist_interval_secs: u64,

    /// Directory holding `backupRoute.dat.<shard>` files.
    pub persist_dir: PathBuf,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            clear_pulling_interval_secs: 5,
            persist_interval_secs: 60,
            persist_dir: PathBuf::from("/tmp"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("/tmp/hb_map.bin"),
            interval_secs: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
