//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry shards and seed them from snapshots
//! - Start the control-plane workers, maintenance and heartbeat
//! - Bind one UDP front-end per shard and begin serving
//! - Stop everything in order and persist a final snapshot
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::schema::AgentConfig;
use crate::control_plane::gateway::ControlPlane;
use crate::control_plane::puller::{HttpRouteSource, PullWorker, RouteSource};
use crate::control_plane::reporter::{HttpReportSink, ReportSink, ReportWorker};
use crate::control_plane::types::GatewayError;
use crate::lifecycle::heartbeat::HeartbeatWriter;
use crate::lifecycle::maintenance::MaintenanceTask;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_termination;
use crate::load_balancer::clock::{Clock, SystemClock};
use crate::load_balancer::shards::RegistryShards;
use crate::net::udp::{ListenerError, UdpFrontend};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("control plane setup failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("listener setup failed: {0}")]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// A running agent: shards, workers and front-ends.
pub struct Agent {
    shards: Arc<RegistryShards>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    frontends: Vec<SocketAddr>,
    config: AgentConfig,
}

impl Agent {
    /// Start against the HTTP naming and reporting services.
    pub async fn start(config: AgentConfig) -> Result<Self, StartupError> {
        let control_plane = &config.control_plane;
        let source = HttpRouteSource::new(&control_plane.naming_url, control_plane.request_timeout())?;
        let sink = HttpReportSink::new(&control_plane.reporter_url, control_plane.request_timeout())?;
        Self::start_with(config, source, sink, Arc::new(SystemClock)).await
    }

    /// Start with any route source and report sink.
    pub async fn start_with<S, R>(
        config: AgentConfig,
        source: S,
        sink: R,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError>
    where
        S: RouteSource + 'static,
        R: ReportSink + 'static,
    {
        let caller_ip = config.agent.caller_ip.unwrap_or_else(detect_caller_ip);
        let (control_plane, pull_rx, report_rx) = ControlPlane::channel();
        let shards = Arc::new(RegistryShards::new(
            config.agent.shards,
            Arc::new(config.lb.clone()),
            control_plane,
            clock.clone(),
            caller_ip,
        ));

        if let Err(e) = shards.restore_all(&config.maintenance.persist_dir) {
            tracing::warn!(dir = ?config.maintenance.persist_dir, error = %e, "Route snapshot unreadable, starting empty");
        }

        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();
        let retry = config.control_plane.retry_policy();

        let puller = PullWorker::new(Arc::new(source), shards.clone(), retry);
        tasks.push(tokio::spawn(puller.run(pull_rx, shutdown.subscribe())));

        let reporter = ReportWorker::new(Arc::new(sink), retry);
        tasks.push(tokio::spawn(reporter.run(report_rx, shutdown.subscribe())));

        let maintenance = MaintenanceTask::new(
            shards.clone(),
            Duration::from_secs(config.maintenance.clear_pulling_interval_secs),
            Duration::from_secs(config.maintenance.persist_interval_secs),
            config.maintenance.persist_dir.clone(),
        );
        tasks.push(tokio::spawn(maintenance.run(shutdown.subscribe())));

        if config.heartbeat.enabled {
            let heartbeat = HeartbeatWriter::new(
                config.heartbeat.path.clone(),
                Duration::from_secs(config.heartbeat.interval_secs),
                clock,
            );
            tasks.push(tokio::spawn(heartbeat.run(shutdown.subscribe())));
        }

        let mut frontends = Vec::with_capacity(shards.len());
        for index in 0..shards.len() {
            let port = config.listener.base_port + index as u16;
            let addr = SocketAddr::new(IpAddr::V4(config.listener.host), port);
            let frontend = UdpFrontend::bind(addr, shards.clone(), index).await?;
            frontends.push(frontend.local_addr().map_err(ListenerError::Bind)?);
            tasks.push(tokio::spawn(frontend.run(shutdown.subscribe())));
        }

        tracing::info!(
            shards = shards.len(),
            caller_ip = %caller_ip,
            base_port = config.listener.base_port,
            "Agent started"
        );

        Ok(Self {
            shards,
            shutdown,
            tasks,
            frontends,
            config,
        })
    }

    pub fn shards(&self) -> &Arc<RegistryShards> {
        &self.shards
    }

    /// Bound address of each shard's front-end, in shard order.
    pub fn frontend_addrs(&self) -> &[SocketAddr] {
        &self.frontends
    }

    /// Stop every task, then persist the routes one last time.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Task ended abnormally");
            }
        }

        let lines = self.shards.persist_all(&self.config.maintenance.persist_dir);
        tracing::info!(lines, "Final route snapshot written");
    }
}

/// Run the agent until SIGINT/SIGTERM.
pub async fn run(config: AgentConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let agent = Agent::start(config).await?;
    wait_for_termination().await;

    tracing::info!("Shutting down");
    agent.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// The address this host uses for outbound traffic, or loopback.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn detect_caller_ip() -> Ipv4Addr {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 53))?;
        socket.local_addr()
    });
    match probe {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => *addr.ip(),
        _ => Ipv4Addr::LOCALHOST,
    }
}
