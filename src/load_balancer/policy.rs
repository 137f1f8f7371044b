//! Tuning values for overload detection and route freshness.

use serde::{Deserialize, Serialize};

/// Thresholds and timers consumed by every endpoint router.
///
/// Loaded from the `[lb]` section of the agent configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LbPolicy {
    /// Virtual successes a host starts with on entering idle, so a handful of
    /// early failures cannot flag it.
    pub init_succ_cnt: u32,

    /// Virtual errors a host carries on entering overloaded.
    pub ovld_err_cnt: u32,

    /// Consecutive successes that return an overloaded host to idle.
    pub contin_succ_lim: u32,

    /// Consecutive failures that push an idle host into overloaded.
    pub contin_err_lim: u32,

    /// Idle selections between two probes of the overloaded rotation.
    pub probe_num: u32,

    /// Age after which a cached route triggers a background re-pull.
    pub update_timeout_secs: u64,

    /// Length of the idle observation window.
    pub clear_timeout_secs: u64,

    /// Minimum spacing of upstream health reports per endpoint.
    pub report_timeout_secs: u64,

    /// Longest time a host stays overloaded before it is forced back to idle.
    pub overload_wait_lim_secs: u64,

    /// Virtual success rate above which an overloaded host recovers.
    pub succ_rate: f64,

    /// Virtual error rate above which an idle host is overloaded.
    pub err_rate: f64,

    /// Real error rate that marks an observation window as bad.
    pub wind_err_rate: f64,

    /// Consecutive bad windows that force an idle host into overloaded.
    pub wind_err_limit: u32,
}

impl Default for LbPolicy {
    fn default() -> Self {
        Self {
            init_succ_cnt: 270,
            ovld_err_cnt: 5,
            contin_succ_lim: 10,
            contin_err_lim: 10,
            probe_num: 10,
            update_timeout_secs: 15,
            clear_timeout_secs: 15,
            report_timeout_secs: 15,
            overload_wait_lim_secs: 300,
            succ_rate: 0.92,
            err_rate: 0.1,
            wind_err_rate: 0.7,
            wind_err_limit: 2,
        }
    }
}

/// Smallest `x >= floor` such that `x / (x + other) > rate`.
///
/// Returns `None` when no count can ever exceed the rate, including when the
/// answer would not fit in a `u64`.
pub(crate) fn min_count_exceeding(rate: f64, other: u64, floor: u64) -> Option<u64> {
    if rate >= 1.0 {
        return None;
    }
    let floor = floor.max(1);
    if rate < 0.0 {
        return Some(floor);
    }
    let estimate = (rate * other as f64 / (1.0 - rate)).floor() as u64;
    let mut x = estimate.saturating_sub(1).max(floor);
    // The estimate is within one of the answer; step until the same float
    // comparison the single-report path uses agrees.
    while !exceeds(x, other, rate) {
        x = x.checked_add(1)?;
    }
    Some(x)
}

/// `part / (part + other) > rate`, computed the way the report path does.
pub(crate) fn exceeds(part: u64, other: u64, rate: f64) -> bool {
    let total = part.saturating_add(other);
    total > 0 && part as f64 / total as f64 > rate
}
