//! Report worker: forwards per-endpoint health reports to the reporting service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::control_plane::puller::directory_url;
use crate::control_plane::types::{GatewayError, ReportStatus};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;
use crate::resilience::backoff::{retry_with_backoff, RetryPolicy};

/// Where health reports go.
pub trait ReportSink: Send + Sync {
    fn send_report(&self, report: &ReportStatus) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Reporting service reached over HTTP: `POST <base>/v1/report` with a JSON body.
#[derive(Debug, Clone)]
pub struct HttpReportSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpReportSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;
        let endpoint = directory_url(base_url)?.join("v1/report")?;
        Ok(Self { client, endpoint })
    }
}

impl ReportSink for HttpReportSink {
    async fn send_report(&self, report: &ReportStatus) -> Result<(), GatewayError> {
        let response = self.client.post(self.endpoint.clone()).json(report).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        Ok(())
    }
}

pub struct ReportWorker<S> {
    sink: Arc<S>,
    retry: RetryPolicy,
}

impl<S: ReportSink + 'static> ReportWorker<S> {
    pub fn new(sink: Arc<S>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    pub async fn run(self, mut reports: UnboundedReceiver<ReportStatus>, mut shutdown: ShutdownSignal) {
        tracing::info!("Report worker starting");
        loop {
            tokio::select! {
                report = reports.recv() => {
                    let Some(report) = report else { break };
                    let sink = self.sink.clone();
                    let retry = self.retry;
                    tokio::spawn(async move {
                        let _ = deliver(sink.as_ref(), &retry, &report).await;
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Report worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Send one report, retrying with backoff. Undeliverable reports are dropped.
pub async fn deliver<S: ReportSink>(sink: &S, retry: &RetryPolicy, report: &ReportStatus) -> Result<(), GatewayError> {
    match retry_with_backoff(retry, "report", || sink.send_report(report)).await {
        Ok(()) => {
            tracing::debug!(modid = report.modid, cmdid = report.cmdid, hosts = report.results.len(), "Health report delivered");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(modid = report.modid, cmdid = report.cmdid, error = %e, "Dropping undeliverable health report");
            metrics::record_control_plane_failure("report");
            Err(e)
        }
    }
}
