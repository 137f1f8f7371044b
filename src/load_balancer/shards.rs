//! Independent registries, each serving a fixed slice of endpoints.
//!
//! An endpoint always lands in shard `(modid + cmdid) % N`, so every query
//! and report for it meets the same lock and the same routers.

use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::control_plane::gateway::ControlPlane;
use crate::load_balancer::clock::Clock;
use crate::load_balancer::endpoint::EndpointKey;
use crate::load_balancer::host::HostAddr;
use crate::load_balancer::policy::LbPolicy;
use crate::load_balancer::registry::{RouteRegistry, UpdateOutcome};
use crate::load_balancer::snapshot::read_snapshot;

/// File name prefix for per-shard route snapshots.
const SNAPSHOT_PREFIX: &str = "backupRoute.dat";

#[derive(Debug)]
pub struct RegistryShards {
    shards: Vec<Arc<RouteRegistry>>,
}

impl RegistryShards {
    /// Build `count` registries with ids `1..=count`.
    pub fn new(
        count: usize,
        policy: Arc<LbPolicy>,
        control_plane: ControlPlane,
        clock: Arc<dyn Clock>,
        caller_ip: Ipv4Addr,
    ) -> Self {
        let count = count.max(1);
        let shards = (1..=count)
            .map(|id| {
                Arc::new(RouteRegistry::new(
                    id,
                    policy.clone(),
                    control_plane.clone(),
                    clock.clone(),
                    caller_ip,
                ))
            })
            .collect();
        Self { shards }
    }

    /// Position of the shard owning `key`.
    pub fn shard_index(&self, key: EndpointKey) -> usize {
        ((key.modid as u64 + key.cmdid as u64) % self.shards.len() as u64) as usize
    }

    pub fn for_endpoint(&self, key: EndpointKey) -> &Arc<RouteRegistry> {
        &self.shards[self.shard_index(key)]
    }

    pub fn get(&self, index: usize) -> Option<&Arc<RouteRegistry>> {
        self.shards.get(index)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteRegistry>> {
        self.shards.iter()
    }

    /// Hand a control-plane answer to the owning shard.
    pub fn apply_update(&self, key: EndpointKey, hosts: &[HostAddr]) -> UpdateOutcome {
        self.for_endpoint(key).apply_update(key, hosts)
    }

    pub fn clear_stale_pull_flags(&self) -> usize {
        self.shards.iter().map(|shard| shard.clear_stale_pull_flags()).sum()
    }

    /// Snapshot path for shard `id` under `dir`.
    pub fn snapshot_path(dir: &Path, id: usize) -> PathBuf {
        dir.join(format!("{SNAPSHOT_PREFIX}.{id}"))
    }

    /// Persist every shard. Failures are logged per shard and do not stop the rest.
    ///
    /// Returns the total number of host lines written.
    pub fn persist_all(&self, dir: &Path) -> usize {
        let mut written = 0;
        for shard in &self.shards {
            let path = Self::snapshot_path(dir, shard.id());
            match shard.persist(&path) {
                Ok(lines) => written += lines,
                Err(e) => tracing::error!(shard = shard.id(), path = ?path, error = %e, "Failed to persist routes"),
            }
        }
        written
    }

    /// Seed every shard from its snapshot file, if one exists.
    ///
    /// Entries are re-routed by key, so snapshots written with a different
    /// shard count still land in the right place.
    pub fn restore_all(&self, dir: &Path) -> io::Result<usize> {
        let mut restored = 0;
        for id in 1..=self.shards.len() {
            let path = Self::snapshot_path(dir, id);
            let snapshot = match read_snapshot(&path) {
                Ok(snapshot) => snapshot,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for (key, hosts) in snapshot {
                self.for_endpoint(key).restore(key, &hosts);
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!(endpoints = restored, dir = ?dir, "Restored routes from snapshot");
        }
        Ok(restored)
    }
}
