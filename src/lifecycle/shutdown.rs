//! Stop signal shared by every long-running task.
//!
//! The signal latches: a task that subscribes after [`Shutdown::trigger`]
//! still sees it on its first [`ShutdownSignal::recv`], so a front-end bound
//! late in startup cannot miss a stop that raced it.

use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of the stop signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    stopped: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            stopped: Arc::new(stopped),
        }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            stopped: self.stopped.subscribe(),
        }
    }

    /// Latch the signal. Returns false when it was already set.
    pub fn trigger(&self) -> bool {
        self.stopped.send_if_modified(|stopped| !std::mem::replace(stopped, true))
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's handle on the stop signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    stopped: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once the agent is stopping, or once every [`Shutdown`] is gone.
    pub async fn recv(&mut self) {
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }
}
