//! Load-balancing agent daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──UDP──▶ net::udp (one socket per shard)
//!                       │
//!                       ▼
//!               load_balancer::shards ──▶ registry ──▶ endpoint routers
//!                       │                      │
//!          pull requests│                      │health reports
//!                       ▼                      ▼
//!               control_plane::puller   control_plane::reporter
//!                       │                      │
//!                  naming service        reporting service
//!
//!   lifecycle: maintenance (stale pulls, snapshots), heartbeat, shutdown
//! ```

use std::path::PathBuf;

use clap::Parser;

use lb_agent::config::load_config;
use lb_agent::lifecycle::startup;
use lb_agent::observability::logging::init_tracing;

#[derive(Parser)]
#[command(name = "lb-agent")]
#[command(about = "Client-side load-balancing agent", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "conf/lb_agent.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_tracing(&config.observability.log_level);

    tracing::info!(
        config = ?cli.config,
        shards = config.agent.shards,
        base_port = config.listener.base_port,
        naming_url = %config.control_plane.naming_url,
        "lb-agent v0.1.0 starting"
    );

    startup::run(config).await?;
    Ok(())
}
