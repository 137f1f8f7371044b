//! Messages exchanged with the naming and reporting services.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::load_balancer::endpoint::EndpointKey;
use crate::load_balancer::host::HostAddr;

/// Ask the naming service for an endpoint's current host list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub modid: u32,
    pub cmdid: u32,
}

impl PullRequest {
    pub fn new(key: EndpointKey) -> Self {
        Self {
            modid: key.modid,
            cmdid: key.cmdid,
        }
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(self.modid, self.cmdid)
    }
}

/// Real call counts for one host since its last report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCallResult {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub succ: u64,
    pub err: u64,
    pub overload: bool,
}

/// Periodic health report for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatus {
    pub modid: u32,
    pub cmdid: u32,
    /// Wall-clock seconds when the report was built.
    pub ts: u64,
    /// This agent's address.
    pub caller: Ipv4Addr,
    pub results: Vec<HostCallResult>,
}

/// Naming service answer. An empty list means the endpoint is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    #[serde(default)]
    pub hosts: Vec<HostAddr>,
}

/// Errors talking to the control plane.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection or transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("control plane returned status {0}")]
    Status(u16),

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_key_round_trip() {
        let key = EndpointKey::new(10001, 1001);
        assert_eq!(PullRequest::new(key).key(), key);
    }

    #[test]
    fn test_route_response_parses_naming_payload() {
        let body = r#"{"hosts":[{"ip":"10.0.0.1","port":8080},{"ip":"10.0.0.2","port":8081}]}"#;
        let parsed: RouteResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.hosts.len(), 2);
        assert_eq!(parsed.hosts[1], HostAddr::new(Ipv4Addr::new(10, 0, 0, 2), 8081));

        let empty: RouteResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.hosts.is_empty());
    }

    #[test]
    fn test_report_serializes_flat_fields() {
        let report = ReportStatus {
            modid: 1,
            cmdid: 2,
            ts: 100,
            caller: Ipv4Addr::new(192, 168, 1, 5),
            results: vec![HostCallResult {
                ip: Ipv4Addr::new(10, 0, 0, 1),
                port: 80,
                succ: 9,
                err: 1,
                overload: false,
            }],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["caller"], "192.168.1.5");
        assert_eq!(value["results"][0]["succ"], 9);
        assert_eq!(value["results"][0]["overload"], false);
    }

    #[test]
    fn test_gateway_error_messages() {
        assert_eq!(GatewayError::Status(503).to_string(), "control plane returned status 503");
        let bad = url::Url::parse("not a url").unwrap_err();
        assert!(GatewayError::from(bad).to_string().starts_with("invalid URL: "));
    }
}
