//! UDP client for the agent's front-end.
//!
//! # Responsibilities
//! - Pick the shard port for an endpoint
//! - Match lookup replies to requests by sequence number
//! - Refuse to query an agent whose heartbeat has gone stale

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::lifecycle::heartbeat;
use crate::load_balancer::clock::{Clock, SystemClock};
use crate::load_balancer::host::HostAddr;
use crate::load_balancer::registry::BatchResult;
use crate::net::codec::{decode, encode, CodecError, Request, Response, RetCode, CALL_OK, MAX_DATAGRAM};

const MIN_TIMEOUT_MS: u64 = 10;
const MAX_TIMEOUT_MS: u64 = 1_000;

/// Sequence numbers run over `0..=i32::MAX` and then wrap.
const SEQ_SPACE: u32 = i32::MAX as u32 + 1;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("agent heartbeat is stale")]
    AgentDown,

    #[error("no reply within {0} ms")]
    Timeout(u64),

    #[error("reply sequence {got} does not match request {expected}")]
    SeqMismatch { expected: u32, got: u32 },

    #[error("every host of the endpoint is overloaded")]
    Overloaded,

    #[error("endpoint has no route yet")]
    NotExist,
}

/// Where the agent lives.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub agent_ip: IpAddr,
    pub base_port: u16,
    pub shards: u16,
    /// Heartbeat file to check before each lookup; `None` skips the check.
    pub heartbeat_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            agent_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 8888,
            shards: 3,
            heartbeat_path: Some(PathBuf::from("/tmp/hb_map.bin")),
        }
    }
}

/// Result of a version-aware route query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    /// -1 while the agent has no hosts for the endpoint.
    pub version: i64,
    pub overload: bool,
    /// Present only when the agent's version differs from the one sent.
    pub hosts: Option<Vec<HostAddr>>,
}

pub struct AgentClient {
    socket: UdpSocket,
    config: ClientConfig,
    seq: u32,
}

impl AgentClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let bind: SocketAddr = match config.agent_ip {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self { socket, config, seq: 0 })
    }

    /// Shard port that owns `(modid, cmdid)`.
    pub fn agent_addr(&self, modid: u32, cmdid: u32) -> SocketAddr {
        let shards = self.config.shards.max(1) as u64;
        let shard = ((modid as u64 + cmdid as u64) % shards) as u16;
        SocketAddr::new(self.config.agent_ip, self.config.base_port.saturating_add(shard))
    }

    /// Ask for one host. `timeout_ms` is clamped to 10..=1000.
    pub async fn get_host(&mut self, modid: u32, cmdid: u32, timeout_ms: u64) -> Result<HostAddr, ClientError> {
        self.ensure_alive()?;
        let timeout_ms = timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);

        let seq = self.next_seq();
        self.send(modid, cmdid, &Request::GetHost { seq, modid, cmdid }).await?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let Response::GetHost {
                seq: got,
                retcode,
                host,
                ..
            } = self.recv_until(deadline, timeout_ms).await?
            else {
                continue;
            };
            if precedes(got, seq) {
                // stale reply from an earlier timed-out request
                continue;
            }
            if got != seq {
                return Err(ClientError::SeqMismatch { expected: seq, got });
            }
            return match (retcode, host) {
                (RetCode::Ok, Some(host)) => Ok(host),
                (RetCode::Overload, _) => Err(ClientError::Overloaded),
                _ => Err(ClientError::NotExist),
            };
        }
    }

    /// Report one call outcome. `tcost` weights failures by duration.
    pub async fn report(
        &self,
        modid: u32,
        cmdid: u32,
        host: HostAddr,
        success: bool,
        tcost: Option<u64>,
    ) -> Result<(), ClientError> {
        let retcode = if success { CALL_OK } else { 1 };
        let request = Request::Report {
            modid,
            cmdid,
            host,
            retcode,
            tcost,
        };
        self.send(modid, cmdid, &request).await
    }

    /// Report successes accumulated by a caller-side cache.
    pub async fn batch_report(&self, modid: u32, cmdid: u32, results: Vec<BatchResult>) -> Result<(), ClientError> {
        self.send(modid, cmdid, &Request::BatchReport { modid, cmdid, results }).await
    }

    pub async fn get_route(&mut self, modid: u32, cmdid: u32, timeout_ms: u64) -> Result<Vec<HostAddr>, ClientError> {
        self.ensure_alive()?;
        let timeout_ms = timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        self.send(modid, cmdid, &Request::GetRoute { modid, cmdid }).await?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Response::Route {
                modid: m,
                cmdid: c,
                hosts,
            } = self.recv_until(deadline, timeout_ms).await?
            {
                if (m, c) == (modid, cmdid) {
                    return Ok(hosts);
                }
            }
        }
    }

    pub async fn get_route_if_changed(
        &mut self,
        modid: u32,
        cmdid: u32,
        version: i64,
        timeout_ms: u64,
    ) -> Result<RouteUpdate, ClientError> {
        self.ensure_alive()?;
        let timeout_ms = timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
        self.send(modid, cmdid, &Request::CacheGetRoute { modid, cmdid, version }).await?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Response::CacheRoute {
                modid: m,
                cmdid: c,
                version,
                overload,
                route,
            } = self.recv_until(deadline, timeout_ms).await?
            {
                if (m, c) == (modid, cmdid) {
                    return Ok(RouteUpdate {
                        version,
                        overload,
                        hosts: route,
                    });
                }
            }
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = (seq + 1) % SEQ_SPACE;
        seq
    }

    fn ensure_alive(&self) -> Result<(), ClientError> {
        match &self.config.heartbeat_path {
            Some(path) if !heartbeat::is_alive(path, SystemClock.now_secs() as i64) => Err(ClientError::AgentDown),
            _ => Ok(()),
        }
    }

    async fn send(&self, modid: u32, cmdid: u32, request: &Request) -> Result<(), ClientError> {
        let bytes = encode(request)?;
        self.socket.send_to(&bytes, self.agent_addr(modid, cmdid)).await?;
        Ok(())
    }

    /// Next decodable reply before `deadline`. Garbage is skipped.
    async fn recv_until(&self, deadline: Instant, timeout_ms: u64) -> Result<Response, ClientError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, _) = timeout_at(deadline, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| ClientError::Timeout(timeout_ms))??;
            match decode(&buf[..len]) {
                Ok(response) => return Ok(response),
                Err(e) => tracing::debug!(error = %e, "Ignoring malformed reply"),
            }
        }
    }
}

/// Whether `got` was issued before `expected`, looking at most half the
/// sequence space back so the comparison survives the wrap.
fn precedes(got: u32, expected: u32) -> bool {
    let behind = expected.wrapping_sub(got) % SEQ_SPACE;
    behind != 0 && behind < SEQ_SPACE / 2
}
