//! Route registry: one endpoint router per `(modid, cmdid)`.
//!
//! # Responsibilities
//! - Lazily create endpoint routers and kick off their first pull
//! - Serve host lookups and route snapshots
//! - Ingest call outcomes and push rate-limited health reports
//! - Apply control-plane updates, deleting endpoints that lost every host
//! - Unstick endpoints whose pull was lost
//! - Persist the route table for crash recovery
//!
//! # Design Decisions
//! - One lock covers the map and every router in it, so a selection never
//!   observes a half-applied update
//! - The clock is read once per operation
//! - Pull requests and reports are built under the lock and enqueued after
//!   it is released; nothing waits on the network while holding it

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::control_plane::gateway::ControlPlane;
use crate::control_plane::types::{PullRequest, ReportStatus};
use crate::load_balancer::clock::Clock;
use crate::load_balancer::endpoint::{EndpointKey, EndpointRouter, HostLookup, Outcome};
use crate::load_balancer::host::HostAddr;
use crate::load_balancer::policy::LbPolicy;
use crate::load_balancer::snapshot::{write_snapshot, RouteSnapshot};
use crate::observability::metrics;

/// Call cost that counts as one failure.
const MS_PER_FAILURE: u64 = 100;
/// Heaviest weight a single slow failure may carry.
const MAX_FAILURE_WEIGHT: u64 = 50;

/// One call outcome reported by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReport {
    pub host: HostAddr,
    pub outcome: Outcome,
    /// Call duration in ms; a slow failure weighs more than one failure.
    pub cost_ms: Option<u64>,
}

impl CallReport {
    pub fn success(host: HostAddr) -> Self {
        Self {
            host,
            outcome: Outcome::Success,
            cost_ms: None,
        }
    }

    pub fn failure(host: HostAddr) -> Self {
        Self {
            host,
            outcome: Outcome::Failure,
            cost_ms: None,
        }
    }

    pub fn with_cost(mut self, cost_ms: u64) -> Self {
        self.cost_ms = Some(cost_ms);
        self
    }

    /// How many failures this report stands for.
    pub fn weight(&self) -> u64 {
        match (self.outcome, self.cost_ms) {
            (Outcome::Failure, Some(cost)) => (cost / MS_PER_FAILURE).clamp(1, MAX_FAILURE_WEIGHT),
            _ => 1,
        }
    }
}

/// Successes a caller-side cache accumulated for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub host: HostAddr,
    pub succ_cnt: u64,
}

/// Answer to a version-aware route query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDelta {
    NotYetAvailable,
    Current {
        version: i64,
        overloaded: bool,
        /// Present only when the caller's version is out of date.
        hosts: Option<Vec<HostAddr>>,
    },
}

/// What a control-plane update did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The endpoint is not tracked; nothing asked for it.
    Ignored,
    /// An empty route removed the endpoint.
    Removed,
    /// Hosts were added or removed.
    Changed,
    /// Same host set; only freshness was renewed.
    Unchanged,
}

/// Concurrent map of endpoint routers behind a single lock.
#[derive(Debug)]
pub struct RouteRegistry {
    id: usize,
    routes: Mutex<HashMap<EndpointKey, EndpointRouter>>,
    policy: Arc<LbPolicy>,
    control_plane: ControlPlane,
    clock: Arc<dyn Clock>,
    caller_ip: Ipv4Addr,
}

impl RouteRegistry {
    /// Create an empty registry.
    ///
    /// `caller_ip` identifies this agent in upstream health reports.
    pub fn new(
        id: usize,
        policy: Arc<LbPolicy>,
        control_plane: ControlPlane,
        clock: Arc<dyn Clock>,
        caller_ip: Ipv4Addr,
    ) -> Self {
        Self {
            id,
            routes: Mutex::new(HashMap::new()),
            policy,
            control_plane,
            clock,
            caller_ip,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn policy(&self) -> &LbPolicy {
        &self.policy
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointKey, EndpointRouter>> {
        self.routes.lock().expect("route registry mutex poisoned")
    }

    /// Pick a host for `key`.
    pub fn get_host(&self, key: EndpointKey) -> HostLookup {
        let now = self.clock.now_secs();
        let (lookup, pull) = {
            let mut routes = self.lock();
            let (router, created) = self.locate_or_create(&mut routes, key);
            let result = match created {
                Some(pull) => (HostLookup::NotYetAvailable, Some(pull)),
                None => (router.select_host(&self.policy), self.refresh_if_stale(router, now)),
            };
            metrics::record_endpoints(self.id, routes.len());
            result
        };

        self.request_pull(pull);
        metrics::record_lookup(lookup.label());
        lookup
    }

    /// Fold one call outcome into `key`'s router.
    ///
    /// Reports for endpoints or hosts this registry does not track are dropped.
    pub fn report(&self, key: EndpointKey, report: CallReport) {
        let now = self.clock.now_secs();
        let status = {
            let mut routes = self.lock();
            let Some(router) = routes.get_mut(&key) else {
                tracing::trace!(endpoint = %key, "Dropping report for unknown endpoint");
                return;
            };
            let weight = report.weight();
            if weight == 1 {
                router.report(report.host, report.outcome, &self.policy, now);
            } else {
                router.report_batch(report.host, report.outcome, weight, &self.policy, now);
            }
            router.maybe_report_upstream(&self.policy, now, self.caller_ip)
        };

        self.push_report(status);
    }

    /// Fold a caller cache's accumulated successes into `key`'s router.
    pub fn batch_report(&self, key: EndpointKey, results: &[BatchResult]) {
        let now = self.clock.now_secs();
        let status = {
            let mut routes = self.lock();
            let Some(router) = routes.get_mut(&key) else {
                tracing::trace!(endpoint = %key, "Dropping batch report for unknown endpoint");
                return;
            };
            for result in results {
                router.report_batch(result.host, Outcome::Success, result.succ_cnt, &self.policy, now);
            }
            router.maybe_report_upstream(&self.policy, now, self.caller_ip)
        };

        self.push_report(status);
    }

    /// Every host currently known for `key`.
    ///
    /// An unknown endpoint is created, a pull is started and the list is empty.
    pub fn get_route(&self, key: EndpointKey) -> Vec<HostAddr> {
        let now = self.clock.now_secs();
        let (hosts, pull) = {
            let mut routes = self.lock();
            let (router, created) = self.locate_or_create(&mut routes, key);
            let result = match created {
                Some(pull) => (Vec::new(), Some(pull)),
                None => (router.hosts(), self.refresh_if_stale(router, now)),
            };
            metrics::record_endpoints(self.id, routes.len());
            result
        };

        self.request_pull(pull);
        hosts
    }

    /// Route for callers that keep their own copy at `known_version`.
    pub fn get_route_if_changed(&self, key: EndpointKey, known_version: i64) -> RouteDelta {
        let now = self.clock.now_secs();
        let (delta, pull) = {
            let mut routes = self.lock();
            let (router, created) = self.locate_or_create(&mut routes, key);
            let result = match created {
                Some(pull) => (RouteDelta::NotYetAvailable, Some(pull)),
                None if router.is_empty() => (RouteDelta::NotYetAvailable, self.refresh_if_stale(router, now)),
                None => {
                    let version = router.version();
                    let delta = RouteDelta::Current {
                        version,
                        overloaded: router.has_overloaded_host(),
                        hosts: (version != known_version).then(|| router.hosts()),
                    };
                    (delta, self.refresh_if_stale(router, now))
                }
            };
            metrics::record_endpoints(self.id, routes.len());
            result
        };

        self.request_pull(pull);
        delta
    }

    /// Apply a host list pushed by the control plane.
    ///
    /// An empty list means the endpoint no longer exists.
    pub fn apply_update(&self, key: EndpointKey, hosts: &[HostAddr]) -> UpdateOutcome {
        let now = self.clock.now_secs();
        let mut routes = self.lock();
        let outcome = match routes.get_mut(&key) {
            None => UpdateOutcome::Ignored,
            Some(_) if hosts.is_empty() => {
                routes.remove(&key);
                tracing::info!(endpoint = %key, "Endpoint removed by control plane");
                UpdateOutcome::Removed
            }
            Some(router) => {
                if router.apply_update(hosts, &self.policy, now) {
                    UpdateOutcome::Changed
                } else {
                    UpdateOutcome::Unchanged
                }
            }
        };
        metrics::record_endpoints(self.id, routes.len());
        outcome
    }

    /// Seed an endpoint from a recovery snapshot, creating it if needed.
    pub fn restore(&self, key: EndpointKey, hosts: &[HostAddr]) {
        if hosts.is_empty() {
            return;
        }
        let now = self.clock.now_secs();
        let mut routes = self.lock();
        routes
            .entry(key)
            .or_insert_with(|| EndpointRouter::new(key))
            .apply_update(hosts, &self.policy, now);
        metrics::record_endpoints(self.id, routes.len());
    }

    /// Reset every outstanding pull so a lost one cannot wedge its endpoint.
    ///
    /// Returns how many endpoints were unstuck.
    pub fn clear_stale_pull_flags(&self) -> usize {
        let mut routes = self.lock();
        let mut cleared = 0;
        for router in routes.values_mut() {
            if router.clear_pulling() {
                cleared += 1;
            }
        }
        if cleared > 0 {
            tracing::debug!(shard = self.id, cleared, "Cleared outstanding pull flags");
        }
        cleared
    }

    /// Copy of every endpoint's host list, ordered by endpoint.
    pub fn snapshot(&self) -> RouteSnapshot {
        let routes = self.lock();
        let mut snapshot: RouteSnapshot = routes
            .values()
            .filter(|router| !router.is_empty())
            .map(|router| (router.key(), router.hosts()))
            .collect();
        snapshot.sort_by_key(|(key, _)| *key);
        snapshot
    }

    /// Write the route table to `path`. Returns the number of host lines.
    pub fn persist(&self, path: &Path) -> io::Result<usize> {
        let snapshot = self.snapshot();
        write_snapshot(path, &snapshot)
    }

    pub fn endpoint_count(&self) -> usize {
        self.lock().len()
    }

    /// Run `f` against one router while holding the registry lock.
    pub fn inspect<R>(&self, key: EndpointKey, f: impl FnOnce(&EndpointRouter) -> R) -> Option<R> {
        self.lock().get(&key).map(f)
    }

    /// Find the router for `key`, creating it and its first pull if absent.
    fn locate_or_create<'a>(
        &self,
        routes: &'a mut HashMap<EndpointKey, EndpointRouter>,
        key: EndpointKey,
    ) -> (&'a mut EndpointRouter, Option<PullRequest>) {
        match routes.entry(key) {
            Entry::Occupied(slot) => (slot.into_mut(), None),
            Entry::Vacant(slot) => {
                let router = slot.insert(EndpointRouter::new(key));
                let pull = router.begin_pull();
                (router, Some(pull))
            }
        }
    }

    fn refresh_if_stale(&self, router: &mut EndpointRouter, now: u64) -> Option<PullRequest> {
        router.needs_refresh(&self.policy, now).then(|| router.begin_pull())
    }

    fn request_pull(&self, pull: Option<PullRequest>) {
        if let Some(request) = pull {
            tracing::debug!(shard = self.id, modid = request.modid, cmdid = request.cmdid, "Requesting route pull");
            self.control_plane.request_pull(request);
        }
    }

    fn push_report(&self, status: Option<ReportStatus>) {
        if let Some(status) = status {
            self.control_plane.push_report(status);
        }
    }
}
