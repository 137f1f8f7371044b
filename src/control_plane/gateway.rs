//! Fire-and-forget queues from the registry to the control-plane workers.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::control_plane::types::{PullRequest, ReportStatus};
use crate::observability::metrics;

/// Sending half of the pull and report queues.
///
/// Enqueueing never blocks, so it is safe to call while holding a lock,
/// though the registry does not.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    pull_tx: UnboundedSender<PullRequest>,
    report_tx: UnboundedSender<ReportStatus>,
}

impl ControlPlane {
    /// Create the gateway together with the receivers the workers consume.
    pub fn channel() -> (Self, UnboundedReceiver<PullRequest>, UnboundedReceiver<ReportStatus>) {
        let (pull_tx, pull_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        (Self { pull_tx, report_tx }, pull_rx, report_rx)
    }

    pub fn request_pull(&self, request: PullRequest) {
        if self.pull_tx.send(request).is_err() {
            tracing::warn!(modid = request.modid, cmdid = request.cmdid, "Pull worker gone, dropping pull request");
            return;
        }
        metrics::record_pull();
    }

    pub fn push_report(&self, report: ReportStatus) {
        let (modid, cmdid) = (report.modid, report.cmdid);
        if self.report_tx.send(report).is_err() {
            tracing::warn!(modid, cmdid, "Report worker gone, dropping report");
            return;
        }
        tracing::debug!(modid, cmdid, "Health report queued");
        metrics::record_report_pushed();
    }
}
