//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber once per process
//! - Let `RUST_LOG` override the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the fmt subscriber. `default_level` applies when `RUST_LOG` is unset.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("lb_agent={level},lb_cli={level}")).unwrap_or_else(|_| EnvFilter::new("lb_agent=info"))
}
