//! Periodic registry upkeep.
//!
//! # Responsibilities
//! - Clear outstanding pull flags so a lost pull cannot wedge an endpoint
//! - Persist every shard's routes for crash recovery

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::load_balancer::shards::RegistryShards;

pub struct MaintenanceTask {
    shards: Arc<RegistryShards>,
    clear_interval: Duration,
    persist_interval: Duration,
    persist_dir: PathBuf,
}

impl MaintenanceTask {
    pub fn new(shards: Arc<RegistryShards>, clear_interval: Duration, persist_interval: Duration, persist_dir: PathBuf) -> Self {
        Self {
            shards,
            clear_interval,
            persist_interval,
            persist_dir,
        }
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            clear_interval_secs = self.clear_interval.as_secs(),
            persist_interval_secs = self.persist_interval.as_secs(),
            persist_dir = ?self.persist_dir,
            "Maintenance starting"
        );

        // first tick of an interval fires immediately; skip it
        let mut clear = time::interval_at(time::Instant::now() + self.clear_interval, self.clear_interval);
        let mut persist = time::interval_at(time::Instant::now() + self.persist_interval, self.persist_interval);
        clear.set_missed_tick_behavior(MissedTickBehavior::Delay);
        persist.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = clear.tick() => {
                    self.shards.clear_stale_pull_flags();
                }
                _ = persist.tick() => {
                    self.persist().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Write the snapshots on the blocking pool and wait for them.
    ///
    /// Shutdown is only observed between ticks, so once this task has
    /// returned no periodic write is still touching the files.
    async fn persist(&self) {
        let shards = self.shards.clone();
        let dir = self.persist_dir.clone();
        match tokio::task::spawn_blocking(move || shards.persist_all(&dir)).await {
            Ok(lines) => tracing::debug!(lines, "Routes persisted"),
            Err(e) => tracing::error!(error = %e, "Route persist task failed"),
        }
    }
}
