//! Shared utilities for integration tests.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lb_agent::config::schema::AgentConfig;
use lb_agent::control_plane::types::{GatewayError, PullRequest, ReportStatus};
use lb_agent::control_plane::{ReportSink, RouteSource};
use lb_agent::load_balancer::HostAddr;

/// One request seen by the mock control plane.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Start a programmable HTTP service standing in for the naming or reporting service.
#[allow(dead_code)]
pub async fn start_mock_service<F>(addr: SocketAddr, f: F)
where
    F: Fn(MockRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request);
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < head_end + content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&data[head_end..]).to_string();

    Some(MockRequest { method, path, body })
}

/// Route source that always answers with the same hosts.
#[allow(dead_code)]
pub struct StaticRoutes(pub Vec<HostAddr>);

impl RouteSource for StaticRoutes {
    async fn fetch_route(&self, _request: PullRequest) -> Result<Vec<HostAddr>, GatewayError> {
        Ok(self.0.clone())
    }
}

/// Route source whose service is always down.
#[allow(dead_code)]
pub struct UnreachableRoutes;

impl RouteSource for UnreachableRoutes {
    async fn fetch_route(&self, _request: PullRequest) -> Result<Vec<HostAddr>, GatewayError> {
        Err(GatewayError::Status(503))
    }
}

/// Report sink that keeps everything it is sent.
#[allow(dead_code)]
#[derive(Default, Clone)]
pub struct CollectedReports(pub Arc<std::sync::Mutex<Vec<ReportStatus>>>);

impl ReportSink for CollectedReports {
    async fn send_report(&self, report: &ReportStatus) -> Result<(), GatewayError> {
        self.0.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Agent config on fixed loopback ports with fast retries and no heartbeat.
#[allow(dead_code)]
pub fn test_config(base_port: u16, persist_dir: PathBuf) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.agent.caller_ip = Some(Ipv4Addr::new(127, 0, 0, 1));
    config.listener.base_port = base_port;
    config.control_plane.max_attempts = 2;
    config.control_plane.base_delay_ms = 5;
    config.control_plane.max_delay_ms = 10;
    config.control_plane.request_timeout_secs = 1;
    config.maintenance.persist_dir = persist_dir;
    config.heartbeat.enabled = false;
    config
}

/// Fresh per-test scratch directory.
#[allow(dead_code)]
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lb_agent_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[allow(dead_code)]
pub fn host(last: u8, port: u16) -> HostAddr {
    HostAddr::new(Ipv4Addr::new(10, 0, 0, last), port)
}

/// Poll `check` until it yields a value or `timeout` passes.
#[allow(dead_code)]
pub async fn eventually<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}
