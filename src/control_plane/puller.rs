//! Pull worker: turns queued pull requests into registry updates.
//!
//! # Responsibilities
//! - Consume the pull queue
//! - Fetch each endpoint's host list from the naming service
//! - Retry with backoff, then leave recovery to the stale pull sweep
//! - Route the answer back to the owning shard

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::control_plane::types::{GatewayError, PullRequest, RouteResponse};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::load_balancer::host::HostAddr;
use crate::load_balancer::registry::UpdateOutcome;
use crate::load_balancer::shards::RegistryShards;
use crate::observability::metrics;
use crate::resilience::backoff::{retry_with_backoff, RetryPolicy};

/// Where host lists come from.
pub trait RouteSource: Send + Sync {
    /// Current hosts for an endpoint. An empty list means it no longer exists.
    fn fetch_route(&self, request: PullRequest) -> impl Future<Output = Result<Vec<HostAddr>, GatewayError>> + Send;
}

/// Naming service reached over HTTP: `GET <base>/v1/route/<modid>/<cmdid>`.
#[derive(Debug, Clone)]
pub struct HttpRouteSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpRouteSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            base: directory_url(base_url)?,
        })
    }

    fn route_url(&self, request: PullRequest) -> Result<Url, GatewayError> {
        Ok(self.base.join(&format!("v1/route/{}/{}", request.modid, request.cmdid))?)
    }
}

impl RouteSource for HttpRouteSource {
    async fn fetch_route(&self, request: PullRequest) -> Result<Vec<HostAddr>, GatewayError> {
        let response = self.client.get(self.route_url(request)?).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        let body: RouteResponse = response.json().await?;
        Ok(body.hosts)
    }
}

/// Parse a base URL so that relative joins append to its path.
pub(crate) fn directory_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Drains the pull queue, one task per request.
pub struct PullWorker<S> {
    source: Arc<S>,
    shards: Arc<RegistryShards>,
    retry: RetryPolicy,
}

impl<S: RouteSource + 'static> PullWorker<S> {
    pub fn new(source: Arc<S>, shards: Arc<RegistryShards>, retry: RetryPolicy) -> Self {
        Self { source, shards, retry }
    }

    pub async fn run(self, mut requests: UnboundedReceiver<PullRequest>, mut shutdown: ShutdownSignal) {
        tracing::info!("Pull worker starting");
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let source = self.source.clone();
                    let shards = self.shards.clone();
                    let retry = self.retry;
                    tokio::spawn(async move {
                        // Failure is already logged; the pull flag is swept later.
                        let _ = fetch_and_apply(source.as_ref(), &shards, &retry, request).await;
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pull worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Fetch one endpoint's route and hand it to its shard.
pub async fn fetch_and_apply<S: RouteSource>(
    source: &S,
    shards: &RegistryShards,
    retry: &RetryPolicy,
    request: PullRequest,
) -> Result<UpdateOutcome, GatewayError> {
    let hosts = match retry_with_backoff(retry, "pull", || source.fetch_route(request)).await {
        Ok(hosts) => hosts,
        Err(e) => {
            tracing::warn!(modid = request.modid, cmdid = request.cmdid, error = %e, "Route pull failed");
            metrics::record_control_plane_failure("pull");
            return Err(e);
        }
    };

    let outcome = shards.apply_update(request.key(), &hosts);
    tracing::debug!(
        modid = request.modid,
        cmdid = request.cmdid,
        hosts = hosts.len(),
        outcome = ?outcome,
        "Route pull applied"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::gateway::ControlPlane;
    use crate::load_balancer::clock::ManualClock;
    use crate::load_balancer::endpoint::{EndpointKey, HostLookup};
    use crate::load_balancer::policy::LbPolicy;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures: u32,
        calls: AtomicU32,
        hosts: Vec<HostAddr>,
    }

    impl RouteSource for FlakySource {
        async fn fetch_route(&self, _request: PullRequest) -> Result<Vec<HostAddr>, GatewayError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(GatewayError::Status(503));
            }
            Ok(self.hosts.clone())
        }
    }

    fn shards() -> RegistryShards {
        let (control_plane, _pulls, _reports) = ControlPlane::channel();
        RegistryShards::new(
            2,
            Arc::new(LbPolicy::default()),
            control_plane,
            Arc::new(ManualClock::new(1_700_000_000)),
            Ipv4Addr::LOCALHOST,
        )
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    #[test]
    fn test_route_url_keeps_base_path() {
        let source = HttpRouteSource::new("http://naming.local:9000/api", Duration::from_secs(1)).unwrap();
        let url = source.route_url(PullRequest { modid: 3, cmdid: 4 }).unwrap();
        assert_eq!(url.as_str(), "http://naming.local:9000/api/v1/route/3/4");
    }

    #[tokio::test]
    async fn test_pull_retries_then_applies() {
        let shards = shards();
        let key = EndpointKey::new(5, 6);
        let host = HostAddr::new(Ipv4Addr::new(10, 0, 0, 9), 7000);
        assert_eq!(shards.for_endpoint(key).get_host(key), HostLookup::NotYetAvailable);

        let source = FlakySource {
            failures: 2,
            calls: AtomicU32::new(0),
            hosts: vec![host],
        };
        let outcome = fetch_and_apply(&source, &shards, &quick_retry(3), PullRequest::new(key)).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Changed);
        assert_eq!(shards.for_endpoint(key).get_host(key), HostLookup::Host(host));
    }

    #[tokio::test]
    async fn test_pull_gives_up() {
        let shards = shards();
        let source = FlakySource {
            failures: 10,
            calls: AtomicU32::new(0),
            hosts: Vec::new(),
        };
        let result = fetch_and_apply(&source, &shards, &quick_retry(2), PullRequest { modid: 1, cmdid: 1 }).await;

        assert!(matches!(result, Err(GatewayError::Status(503))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
