//! UDP front-end: one socket per registry shard.
//!
//! # Responsibilities
//! - Bind the shard's loopback port
//! - Decode caller datagrams and dispatch them to the registry
//! - Reply to lookups; reports are one-way

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::load_balancer::registry::{CallReport, RouteDelta};
use crate::load_balancer::shards::RegistryShards;
use crate::net::codec::{decode, encode, Request, Response, RetCode, CALL_OK, MAX_DATAGRAM};

/// Error type for front-end setup.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

pub struct UdpFrontend {
    socket: UdpSocket,
    shards: Arc<RegistryShards>,
    /// Shard this socket was opened for; used in logs only.
    shard: usize,
}

impl UdpFrontend {
    pub async fn bind(addr: SocketAddr, shards: Arc<RegistryShards>, shard: usize) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = socket.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(address = %local_addr, shard, "UDP front-end bound");

        Ok(Self { socket, shards, shard })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve datagrams until shutdown.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => self.handle(&buf[..len], peer).await,
                        Err(e) => tracing::warn!(shard = self.shard, error = %e, "UDP receive failed"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(shard = self.shard, "UDP front-end received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn handle(&self, datagram: &[u8], peer: SocketAddr) {
        let request: Request = match decode(datagram) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(shard = self.shard, peer = %peer, error = %e, "Dropping undecodable datagram");
                return;
            }
        };

        let Some(response) = dispatch(&self.shards, request) else {
            return;
        };
        let bytes = match encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(shard = self.shard, peer = %peer, error = %e, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, peer).await {
            tracing::warn!(shard = self.shard, peer = %peer, error = %e, "Failed to send response");
        }
    }
}

/// Run one request against the registry that owns its endpoint.
pub fn dispatch(shards: &RegistryShards, request: Request) -> Option<Response> {
    let key = request.key();
    let registry = shards.for_endpoint(key);

    match request {
        Request::GetHost { seq, modid, cmdid } => {
            let (retcode, host) = RetCode::from_lookup(registry.get_host(key));
            Some(Response::GetHost {
                seq,
                modid,
                cmdid,
                retcode,
                host,
            })
        }
        Request::Report {
            host, retcode, tcost, ..
        } => {
            let report = if retcode == CALL_OK {
                CallReport::success(host)
            } else {
                let report = CallReport::failure(host);
                match tcost {
                    Some(cost) => report.with_cost(cost),
                    None => report,
                }
            };
            registry.report(key, report);
            None
        }
        Request::BatchReport { results, .. } => {
            registry.batch_report(key, &results);
            None
        }
        Request::GetRoute { modid, cmdid } => Some(Response::Route {
            modid,
            cmdid,
            hosts: registry.get_route(key),
        }),
        Request::CacheGetRoute { modid, cmdid, version } => {
            let response = match registry.get_route_if_changed(key, version) {
                RouteDelta::NotYetAvailable => Response::CacheRoute {
                    modid,
                    cmdid,
                    version: -1,
                    overload: false,
                    route: None,
                },
                RouteDelta::Current {
                    version,
                    overloaded,
                    hosts,
                } => Response::CacheRoute {
                    modid,
                    cmdid,
                    version,
                    overload: overloaded,
                    route: hosts,
                },
            };
            Some(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::gateway::ControlPlane;
    use crate::load_balancer::clock::ManualClock;
    use crate::load_balancer::endpoint::EndpointKey;
    use crate::load_balancer::host::HostAddr;
    use crate::load_balancer::policy::LbPolicy;
    use crate::load_balancer::registry::BatchResult;
    use std::net::Ipv4Addr;

    fn shards() -> RegistryShards {
        let (control_plane, _pulls, _reports) = ControlPlane::channel();
        RegistryShards::new(
            3,
            Arc::new(LbPolicy::default()),
            control_plane,
            Arc::new(ManualClock::new(1_700_000_000)),
            Ipv4Addr::LOCALHOST,
        )
    }

    fn host(last: u8) -> HostAddr {
        HostAddr::new(Ipv4Addr::new(10, 0, 0, last), 9000)
    }

    #[test]
    fn test_get_host_before_and_after_route() {
        let shards = shards();
        let first = dispatch(&shards, Request::GetHost { seq: 1, modid: 4, cmdid: 5 });
        assert_eq!(
            first,
            Some(Response::GetHost {
                seq: 1,
                modid: 4,
                cmdid: 5,
                retcode: RetCode::NotExist,
                host: None,
            })
        );

        shards.apply_update(EndpointKey::new(4, 5), &[host(1)]);
        let second = dispatch(&shards, Request::GetHost { seq: 2, modid: 4, cmdid: 5 });
        assert_eq!(
            second,
            Some(Response::GetHost {
                seq: 2,
                modid: 4,
                cmdid: 5,
                retcode: RetCode::Ok,
                host: Some(host(1)),
            })
        );
    }

    #[test]
    fn test_reports_have_no_reply() {
        let shards = shards();
        let key = EndpointKey::new(1, 1);
        shards.for_endpoint(key).restore(key, &[host(1)]);

        let report = Request::Report {
            modid: 1,
            cmdid: 1,
            host: host(1),
            retcode: 1,
            tcost: Some(300),
        };
        assert_eq!(dispatch(&shards, report), None);
        let err = shards.for_endpoint(key).inspect(key, |router| router.host(&host(1)).map(|h| h.real_err));
        assert_eq!(err, Some(Some(3)));

        let batch = Request::BatchReport {
            modid: 1,
            cmdid: 1,
            results: vec![BatchResult { host: host(1), succ_cnt: 4 }],
        };
        assert_eq!(dispatch(&shards, batch), None);
    }

    #[test]
    fn test_cache_route_versions() {
        let shards = shards();
        let missing = dispatch(&shards, Request::CacheGetRoute { modid: 2, cmdid: 2, version: 0 });
        assert!(matches!(missing, Some(Response::CacheRoute { version: -1, route: None, .. })));

        let key = EndpointKey::new(2, 2);
        shards.apply_update(key, &[host(1), host(2)]);
        let Some(Response::CacheRoute { version, route, .. }) =
            dispatch(&shards, Request::CacheGetRoute { modid: 2, cmdid: 2, version: -1 })
        else {
            panic!("expected a cache route");
        };
        assert_eq!(route, Some(vec![host(1), host(2)]));

        let unchanged = dispatch(&shards, Request::CacheGetRoute { modid: 2, cmdid: 2, version });
        assert!(matches!(unchanged, Some(Response::CacheRoute { route: None, .. })));
    }
}
