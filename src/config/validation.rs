//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates in (0, 1), intervals > 0, ports valid)
//! - Check control-plane URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AgentConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::config::schema::AgentConfig;

pub const MAX_SHARDS: usize = 16;

/// One rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let shards = config.agent.shards;
    if !(1..=MAX_SHARDS).contains(&shards) {
        errors.push(ValidationError::new("agent.shards", format!("must be between 1 and {MAX_SHARDS}")));
    } else if config.listener.base_port as usize + shards - 1 > u16::MAX as usize {
        errors.push(ValidationError::new("listener.base_port", "shard ports overflow 65535"));
    }

    let lb = &config.lb;
    for (field, rate) in [
        ("lb.succ_rate", lb.succ_rate),
        ("lb.err_rate", lb.err_rate),
        ("lb.wind_err_rate", lb.wind_err_rate),
    ] {
        if !(rate > 0.0 && rate < 1.0) {
            errors.push(ValidationError::new(field, "must be strictly between 0 and 1"));
        }
    }
    for (field, value) in [
        ("lb.init_succ_cnt", lb.init_succ_cnt as u64),
        ("lb.ovld_err_cnt", lb.ovld_err_cnt as u64),
        ("lb.contin_succ_lim", lb.contin_succ_lim as u64),
        ("lb.contin_err_lim", lb.contin_err_lim as u64),
        ("lb.probe_num", lb.probe_num as u64),
        ("lb.wind_err_limit", lb.wind_err_limit as u64),
        ("lb.update_timeout_secs", lb.update_timeout_secs),
        ("lb.clear_timeout_secs", lb.clear_timeout_secs),
        ("lb.report_timeout_secs", lb.report_timeout_secs),
        ("lb.overload_wait_lim_secs", lb.overload_wait_lim_secs),
        ("control_plane.request_timeout_secs", config.control_plane.request_timeout_secs),
        ("control_plane.max_attempts", config.control_plane.max_attempts as u64),
        ("maintenance.clear_pulling_interval_secs", config.maintenance.clear_pulling_interval_secs),
        ("maintenance.persist_interval_secs", config.maintenance.persist_interval_secs),
        ("heartbeat.interval_secs", config.heartbeat.interval_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let control_plane = &config.control_plane;
    if control_plane.base_delay_ms > control_plane.max_delay_ms {
        errors.push(ValidationError::new("control_plane.base_delay_ms", "must not exceed max_delay_ms"));
    }
    for (field, raw) in [
        ("control_plane.naming_url", &control_plane.naming_url),
        ("control_plane.reporter_url", &control_plane.reporter_url),
    ] {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(field, format!("unsupported scheme '{}'", url.scheme()))),
            Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
        }
    }

    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(config: &AgentConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn test_rates_must_be_open_interval() {
        let mut config = AgentConfig::default();
        config.lb.succ_rate = 1.0;
        config.lb.wind_err_rate = 0.0;
        assert_eq!(fields(&config), vec!["lb.succ_rate", "lb.wind_err_rate"]);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = AgentConfig::default();
        config.lb.probe_num = 0;
        config.maintenance.persist_interval_secs = 0;
        assert_eq!(fields(&config), vec!["lb.probe_num", "maintenance.persist_interval_secs"]);
    }

    #[test]
    fn test_shard_ports_must_fit() {
        let mut config = AgentConfig::default();
        config.listener.base_port = 65_535;
        assert_eq!(fields(&config), vec!["listener.base_port"]);

        config.agent.shards = 17;
        assert_eq!(fields(&config), vec!["agent.shards"]);
    }

    #[test]
    fn test_urls_need_http_scheme() {
        let mut config = AgentConfig::default();
        config.control_plane.naming_url = "ftp://naming".to_string();
        config.control_plane.reporter_url = "not a url".to_string();
        assert_eq!(fields(&config), vec!["control_plane.naming_url", "control_plane.reporter_url"]);
    }
}
