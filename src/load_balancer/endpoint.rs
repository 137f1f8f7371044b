//! Per-endpoint host selection and overload detection.
//!
//! # Responsibilities
//! - Own every `HostRecord` of one `(modid, cmdid)`
//! - Round-robin over the idle rotation, probing the overloaded rotation
//!   once every `probe_num` selections
//! - Fold call outcomes into the counters and flip host state
//! - Replace the host set on control-plane updates
//! - Build rate-limited health reports for the reporter
//!
//! # State Transitions
//! ```text
//! Idle → Overloaded:  failure AND (virtual err rate > err_rate
//!                                  OR failure streak >= contin_err_lim)
//!                     OR window expiry with wind_err_limit bad windows in a row
//! Overloaded → Idle:  success AND (virtual succ rate > succ_rate
//!                                  OR success streak >= contin_succ_lim)
//!                     OR overloaded for overload_wait_lim_secs
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::control_plane::types::{HostCallResult, PullRequest, ReportStatus};
use crate::load_balancer::host::{HostAddr, HostRecord};
use crate::load_balancer::policy::{min_count_exceeding, LbPolicy};
use crate::load_balancer::rotation::Rotation;
use crate::observability::metrics;

/// A logical service, addressed by module and command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub modid: u32,
    pub cmdid: u32,
}

impl EndpointKey {
    pub fn new(modid: u32, cmdid: u32) -> Self {
        Self { modid, cmdid }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.modid, self.cmdid)
    }
}

/// Whether the cached route may be trusted or a pull is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Fresh,
    Fetching,
}

/// Outcome of one call, as reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Result of asking for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLookup {
    Host(HostAddr),
    /// Every host is overloaded and this call is not a probe; fail fast.
    AllOverloaded,
    /// The route has not been fetched yet.
    NotYetAvailable,
}

impl HostLookup {
    pub fn host(self) -> Option<HostAddr> {
        match self {
            HostLookup::Host(addr) => Some(addr),
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            HostLookup::Host(_) => "host",
            HostLookup::AllOverloaded => "overload",
            HostLookup::NotYetAvailable => "not_exist",
        }
    }
}

/// A host state change caused by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Virtual error rate or failure streak crossed its threshold.
    Overloaded,
    /// Too many consecutive windows with a high real error rate.
    WindowTripped,
    /// Virtual success rate or success streak crossed its threshold.
    Recovered,
    /// The host sat in overloaded for the maximum wait.
    WaitExpired,
}

impl Transition {
    pub fn to_overloaded(self) -> bool {
        matches!(self, Transition::Overloaded | Transition::WindowTripped)
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Transition::Overloaded => "overloaded",
            Transition::WindowTripped => "window_tripped",
            Transition::Recovered => "recovered",
            Transition::WaitExpired => "wait_expired",
        }
    }
}

/// Host set and selection state for one endpoint.
#[derive(Debug)]
pub struct EndpointRouter {
    key: EndpointKey,
    hosts: BTreeMap<HostAddr, HostRecord>,
    idle: Rotation,
    overloaded: Rotation,
    probe_counter: u32,
    version: i64,
    fetch_state: FetchState,
    cache_effective_at: u64,
    last_report_at: u64,
}

impl EndpointRouter {
    /// A router with no hosts yet; usable after its first update.
    pub fn new(key: EndpointKey) -> Self {
        Self {
            key,
            hosts: BTreeMap::new(),
            idle: Rotation::new(),
            overloaded: Rotation::new(),
            probe_counter: 0,
            version: 0,
            fetch_state: FetchState::Fetching,
            cache_effective_at: 0,
            last_report_at: 0,
        }
    }

    pub fn key(&self) -> EndpointKey {
        self.key
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch_state
    }

    pub fn host(&self, addr: &HostAddr) -> Option<&HostRecord> {
        self.hosts.get(addr)
    }

    pub fn has_overloaded_host(&self) -> bool {
        !self.overloaded.is_empty()
    }

    /// Every known host, ordered by address.
    pub fn hosts(&self) -> Vec<HostAddr> {
        self.hosts.keys().copied().collect()
    }

    pub fn idle_hosts(&self) -> impl Iterator<Item = &HostAddr> {
        self.idle.iter()
    }

    pub fn overloaded_hosts(&self) -> impl Iterator<Item = &HostAddr> {
        self.overloaded.iter()
    }

    /// Pick the next host to call.
    pub fn select_host(&mut self, policy: &LbPolicy) -> HostLookup {
        if self.hosts.is_empty() {
            return HostLookup::NotYetAvailable;
        }

        if self.idle.is_empty() {
            if self.probe_counter >= policy.probe_num {
                self.probe_counter = 0;
                return self.probe();
            }
            self.probe_counter += 1;
            return HostLookup::AllOverloaded;
        }

        if self.overloaded.is_empty() {
            // Only count selections while something is overloaded.
            self.probe_counter = 0;
        } else if self.probe_counter >= policy.probe_num {
            self.probe_counter = 0;
            return self.probe();
        } else {
            self.probe_counter += 1;
        }

        match self.idle.rotate() {
            Some(addr) => HostLookup::Host(addr),
            None => HostLookup::NotYetAvailable,
        }
    }

    fn probe(&mut self) -> HostLookup {
        match self.overloaded.rotate() {
            Some(addr) => {
                tracing::debug!(endpoint = %self.key, host = %addr, "Probing overloaded host");
                HostLookup::Host(addr)
            }
            None => HostLookup::NotYetAvailable,
        }
    }

    /// Fold a single call outcome into the host's counters.
    pub fn report(
        &mut self,
        addr: HostAddr,
        outcome: Outcome,
        policy: &LbPolicy,
        now: u64,
    ) -> Option<Transition> {
        self.report_batch(addr, outcome, 1, policy, now)
    }

    /// Fold `count` identical outcomes into the host's counters at once.
    ///
    /// The crossing point of each threshold is computed in closed form, so
    /// the counters end where `count` single reports would leave them, with
    /// the window and overload-wait timers evaluated once at the end.
    pub fn report_batch(
        &mut self,
        addr: HostAddr,
        outcome: Outcome,
        count: u64,
        policy: &LbPolicy,
        now: u64,
    ) -> Option<Transition> {
        if count == 0 {
            return None;
        }
        let key = self.key;
        let host = self.hosts.get_mut(&addr)?;

        let transition = match (host.overloaded, outcome) {
            (false, Outcome::Failure) => absorb_failures(key, host, count, policy, now),
            (true, Outcome::Success) => absorb_successes(key, host, count, policy, now),
            (false, Outcome::Success) => {
                host.add_successes(count);
                None
            }
            (true, Outcome::Failure) => {
                host.add_failures(count);
                None
            }
        };
        let transition = transition.or_else(|| check_timers(key, host, policy, now));

        if let Some(transition) = transition {
            if transition.to_overloaded() {
                self.idle.remove(&addr);
                self.overloaded.push_back(addr);
            } else {
                self.overloaded.remove(&addr);
                self.idle.push_back(addr);
            }
            metrics::record_transition(transition.label());
        }
        transition
    }

    /// Replace the host set with `hosts`.
    ///
    /// Returns true when any host was added or removed. `hosts` must not be
    /// empty; an empty route deletes the whole endpoint one level up.
    pub fn apply_update(&mut self, hosts: &[HostAddr], policy: &LbPolicy, now: u64) -> bool {
        debug_assert!(!hosts.is_empty(), "empty route must delete the endpoint");

        let first_population = self.hosts.is_empty();
        let mut changed = false;

        for addr in hosts {
            if !self.hosts.contains_key(addr) {
                self.hosts.insert(*addr, HostRecord::new(*addr, policy.init_succ_cnt, now));
                self.idle.push_back(*addr);
                changed = true;
            }
        }

        let remote: HashSet<&HostAddr> = hosts.iter().collect();
        let stale: Vec<HostAddr> = self
            .hosts
            .keys()
            .filter(|addr| !remote.contains(addr))
            .copied()
            .collect();
        for addr in stale {
            if let Some(record) = self.hosts.remove(&addr) {
                if record.overloaded {
                    self.overloaded.remove(&addr);
                } else {
                    self.idle.remove(&addr);
                }
                changed = true;
            }
        }

        self.cache_effective_at = now;
        self.fetch_state = FetchState::Fresh;
        // No report until a full interval of traffic has been seen.
        if first_population {
            self.last_report_at = now;
        }
        if changed {
            self.version = (now as i64).max(self.version + 1);
            tracing::info!(
                endpoint = %self.key,
                hosts = self.hosts.len(),
                version = self.version,
                "Route updated"
            );
        }
        changed
    }

    /// Whether a background re-pull should be started now.
    pub fn needs_refresh(&self, policy: &LbPolicy, now: u64) -> bool {
        self.fetch_state == FetchState::Fresh
            && (self.hosts.is_empty()
                || now.saturating_sub(self.cache_effective_at) > policy.update_timeout_secs)
    }

    /// Mark a pull outstanding and build its request.
    pub fn begin_pull(&mut self) -> PullRequest {
        self.fetch_state = FetchState::Fetching;
        PullRequest::new(self.key)
    }

    /// Forget an outstanding pull. Returns true if one was pending.
    pub fn clear_pulling(&mut self) -> bool {
        if self.fetch_state == FetchState::Fetching {
            self.fetch_state = FetchState::Fresh;
            true
        } else {
            false
        }
    }

    /// Build a health report if the report interval has elapsed.
    ///
    /// Clears the real counters that went into the report.
    pub fn maybe_report_upstream(
        &mut self,
        policy: &LbPolicy,
        now: u64,
        caller: Ipv4Addr,
    ) -> Option<ReportStatus> {
        if self.hosts.is_empty() || now.saturating_sub(self.last_report_at) < policy.report_timeout_secs {
            return None;
        }
        self.last_report_at = now;

        let hosts = &mut self.hosts;
        let mut results = Vec::with_capacity(hosts.len());
        for addr in self.idle.iter().chain(self.overloaded.iter()) {
            if let Some(host) = hosts.get_mut(addr) {
                results.push(HostCallResult {
                    ip: addr.ip,
                    port: addr.port,
                    succ: host.real_succ,
                    err: host.real_err,
                    overload: host.overloaded,
                });
                host.real_succ = 0;
                host.real_err = 0;
            }
        }

        Some(ReportStatus {
            modid: self.key.modid,
            cmdid: self.key.cmdid,
            ts: now,
            caller,
            results,
        })
    }
}

fn absorb_failures(
    key: EndpointKey,
    host: &mut HostRecord,
    count: u64,
    policy: &LbPolicy,
    now: u64,
) -> Option<Transition> {
    let by_streak = (policy.contin_err_lim as u64).saturating_sub(host.contin_err).max(1);
    let by_rate = min_count_exceeding(policy.err_rate, host.succ, host.err.saturating_add(1))
        .map(|total| total.saturating_sub(host.err).max(1));
    let needed = by_rate.map_or(by_streak, |n| n.min(by_streak));
    if needed > count {
        host.add_failures(count);
        return None;
    }

    host.add_failures(needed);
    tracing::warn!(
        endpoint = %key,
        host = %host.addr,
        succ = host.succ,
        err = host.err,
        contin_err = host.contin_err,
        "Host overloaded"
    );
    host.set_overload(policy.ovld_err_cnt, now);
    let rest = count - needed;
    if rest > 0 {
        host.add_failures(rest);
    }
    Some(Transition::Overloaded)
}

fn absorb_successes(
    key: EndpointKey,
    host: &mut HostRecord,
    count: u64,
    policy: &LbPolicy,
    now: u64,
) -> Option<Transition> {
    let by_streak = (policy.contin_succ_lim as u64).saturating_sub(host.contin_succ).max(1);
    let by_rate = min_count_exceeding(policy.succ_rate, host.err, host.succ.saturating_add(1))
        .map(|total| total.saturating_sub(host.succ).max(1));
    let needed = by_rate.map_or(by_streak, |n| n.min(by_streak));
    if needed > count {
        host.add_successes(count);
        return None;
    }

    host.add_successes(needed);
    tracing::info!(
        endpoint = %key,
        host = %host.addr,
        succ = host.succ,
        err = host.err,
        contin_succ = host.contin_succ,
        "Host recovered to idle"
    );
    host.reset_idle(policy.init_succ_cnt, now);
    let rest = count - needed;
    if rest > 0 {
        host.add_successes(rest);
    }
    Some(Transition::Recovered)
}

fn check_timers(key: EndpointKey, host: &mut HostRecord, policy: &LbPolicy, now: u64) -> Option<Transition> {
    if !host.overloaded {
        if host.window_expired(policy, now) {
            if host.check_window_trip(policy) {
                tracing::warn!(
                    endpoint = %key,
                    host = %host.addr,
                    real_succ = host.real_succ,
                    real_err = host.real_err,
                    windows = host.window_err_streak,
                    "Host overloaded after consecutive bad windows"
                );
                host.set_overload(policy.ovld_err_cnt, now);
                return Some(Transition::WindowTripped);
            }
            host.reset_idle(policy.init_succ_cnt, now);
        }
        return None;
    }

    if host.overload_expired(policy, now) {
        tracing::info!(
            endpoint = %key,
            host = %host.addr,
            succ = host.succ,
            err = host.err,
            "Host overload wait expired, back to idle"
        );
        host.reset_idle(policy.init_succ_cnt, now);
        return Some(Transition::WaitExpired);
    }
    None
}
