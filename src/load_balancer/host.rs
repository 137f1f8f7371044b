//! Per-host call accounting.
//!
//! # Responsibilities
//! - Identify a host inside an endpoint (`ip:port`)
//! - Track virtual counters used for state-transition arithmetic
//! - Track real counters for the observation window and upstream reports
//! - Track consecutive success/failure streaks
//! - Hold the idle/overloaded state and its timestamps

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::load_balancer::policy::LbPolicy;

/// Address of one candidate host. Unique within an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl HostAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl From<SocketAddrV4> for HostAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<HostAddr> for SocketAddrV4 {
    fn from(addr: HostAddr) -> Self {
        SocketAddrV4::new(addr.ip, addr.port)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Counters and state for one host.
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub addr: HostAddr,

    /// Virtual success count.
    pub succ: u64,
    /// Virtual error count.
    pub err: u64,

    /// Real successes since the last window or report reset.
    pub real_succ: u64,
    /// Real errors since the last window or report reset.
    pub real_err: u64,

    pub contin_succ: u64,
    pub contin_err: u64,

    pub overloaded: bool,
    /// Start of the current idle observation window.
    pub window_start: u64,
    /// When the host last became overloaded (0 while idle).
    pub overloaded_at: u64,
    /// Consecutive windows whose real error rate was too high.
    pub window_err_streak: u32,
}

impl HostRecord {
    /// Create an idle host.
    pub fn new(addr: HostAddr, init_succ: u32, now: u64) -> Self {
        let mut record = Self {
            addr,
            succ: 0,
            err: 0,
            real_succ: 0,
            real_err: 0,
            contin_succ: 0,
            contin_err: 0,
            overloaded: false,
            window_start: 0,
            overloaded_at: 0,
            window_err_streak: 0,
        };
        record.reset_idle(init_succ, now);
        record
    }

    /// Enter (or restart) the idle state with a fresh window.
    ///
    /// `window_err_streak` survives: it counts across windows.
    pub fn reset_idle(&mut self, init_succ: u32, now: u64) {
        self.succ = init_succ as u64;
        self.err = 0;
        self.real_succ = 0;
        self.real_err = 0;
        self.contin_succ = 0;
        self.contin_err = 0;
        self.overloaded = false;
        self.window_start = now;
        self.overloaded_at = 0;
    }

    /// Enter the overloaded state.
    pub fn set_overload(&mut self, overload_err: u32, now: u64) {
        self.succ = 0;
        self.err = overload_err as u64;
        self.real_succ = 0;
        self.real_err = 0;
        self.contin_succ = 0;
        self.contin_err = 0;
        self.overloaded = true;
        self.overloaded_at = now;
        self.window_err_streak = 0;
    }

    /// Evaluate the expired idle window against the real error rate.
    ///
    /// Returns true once enough consecutive windows were bad that the host
    /// must be forced into overloaded.
    pub fn check_window_trip(&mut self, policy: &LbPolicy) -> bool {
        let total = self.real_succ.saturating_add(self.real_err);
        if total == 0 {
            self.window_err_streak = 0;
            return false;
        }
        if self.real_err as f64 / total as f64 >= policy.wind_err_rate {
            self.window_err_streak = self.window_err_streak.saturating_add(1);
            return self.window_err_streak >= policy.wind_err_limit;
        }
        self.window_err_streak = 0;
        false
    }

    /// Whether the idle window has run its full length.
    pub fn window_expired(&self, policy: &LbPolicy, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= policy.clear_timeout_secs
    }

    /// Whether the host has waited out its maximum overload time.
    pub fn overload_expired(&self, policy: &LbPolicy, now: u64) -> bool {
        now.saturating_sub(self.overloaded_at) >= policy.overload_wait_lim_secs
    }

    // Batch counts come straight off the wire, so every counter saturates.
    pub(crate) fn add_successes(&mut self, n: u64) {
        self.succ = self.succ.saturating_add(n);
        self.real_succ = self.real_succ.saturating_add(n);
        self.contin_succ = self.contin_succ.saturating_add(n);
        self.contin_err = 0;
    }

    pub(crate) fn add_failures(&mut self, n: u64) {
        self.err = self.err.saturating_add(n);
        self.real_err = self.real_err.saturating_add(n);
        self.contin_err = self.contin_err.saturating_add(n);
        self.contin_succ = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostRecord {
        HostRecord::new(HostAddr::new(Ipv4Addr::new(10, 0, 0, 1), 80), 270, 1_000)
    }

    #[test]
    fn test_new_host_is_idle_and_seeded() {
        let h = host();
        assert!(!h.overloaded);
        assert_eq!(h.succ, 270);
        assert_eq!(h.err, 0);
        assert_eq!(h.window_start, 1_000);
        assert_eq!(h.overloaded_at, 0);
    }

    #[test]
    fn test_set_overload_then_reset_idle() {
        let mut h = host();
        h.add_failures(3);
        h.window_err_streak = 1;

        h.set_overload(5, 1_010);
        assert!(h.overloaded);
        assert_eq!((h.succ, h.err), (0, 5));
        assert_eq!((h.real_succ, h.real_err), (0, 0));
        assert_eq!(h.overloaded_at, 1_010);
        assert_eq!(h.window_err_streak, 0);

        h.window_err_streak = 1;
        h.reset_idle(270, 1_020);
        assert!(!h.overloaded);
        assert_eq!(h.overloaded_at, 0);
        assert_eq!(h.window_start, 1_020);
        // streak is cross-window
        assert_eq!(h.window_err_streak, 1);
    }

    #[test]
    fn test_window_trip_needs_consecutive_bad_windows() {
        let policy = LbPolicy::default();
        let mut h = host();

        h.real_succ = 2;
        h.real_err = 8;
        assert!(!h.check_window_trip(&policy));
        assert_eq!(h.window_err_streak, 1);

        h.real_succ = 3;
        h.real_err = 7;
        assert!(h.check_window_trip(&policy));
        assert_eq!(h.window_err_streak, 2);
    }

    #[test]
    fn test_window_without_traffic_clears_streak() {
        let policy = LbPolicy::default();
        let mut h = host();
        h.window_err_streak = 1;

        assert!(!h.check_window_trip(&policy));
        assert_eq!(h.window_err_streak, 0);
    }

    #[test]
    fn test_good_window_clears_streak() {
        let policy = LbPolicy::default();
        let mut h = host();
        h.window_err_streak = 1;
        h.real_succ = 9;
        h.real_err = 1;

        assert!(!h.check_window_trip(&policy));
        assert_eq!(h.window_err_streak, 0);
    }

    #[test]
    fn test_streak_counters_reset_on_opposite_outcome() {
        let mut h = host();
        h.add_failures(4);
        assert_eq!(h.contin_err, 4);
        h.add_successes(1);
        assert_eq!((h.contin_succ, h.contin_err), (1, 0));
        h.add_failures(1);
        assert_eq!((h.contin_succ, h.contin_err), (0, 1));
    }
}
