//! Liveness stamp shared with callers through a small file.
//!
//! The file holds the agent's wall-clock seconds as an 8-byte native-endian
//! `i64`. Callers treat a stamp older than [`MAX_HEARTBEAT_AGE_SECS`] as a
//! dead agent and stop sending it queries.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::load_balancer::clock::Clock;

pub const MAX_HEARTBEAT_AGE_SECS: i64 = 2;

/// Stamp `path` with `now_secs`.
///
/// The stamp is written beside the file and renamed over it; readers see
/// the old stamp or the new one, never a truncated file.
pub fn write_heartbeat(path: &Path, now_secs: i64) -> io::Result<()> {
    let staging = staging_path(path);
    std::fs::write(&staging, now_secs.to_ne_bytes())?;
    std::fs::rename(&staging, path)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn read_heartbeat(path: &Path) -> io::Result<i64> {
    let bytes = std::fs::read(path)?;
    let stamp: [u8; 8] = bytes
        .get(..8)
        .and_then(|head| head.try_into().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "heartbeat file shorter than 8 bytes"))?;
    Ok(i64::from_ne_bytes(stamp))
}

/// Whether the agent stamped `path` recently enough. Unreadable means dead.
pub fn is_alive(path: &Path, now_secs: i64) -> bool {
    match read_heartbeat(path) {
        Ok(stamp) => now_secs - stamp <= MAX_HEARTBEAT_AGE_SECS,
        Err(_) => false,
    }
}

/// Periodically refreshes the heartbeat file.
pub struct HeartbeatWriter {
    path: PathBuf,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl HeartbeatWriter {
    pub fn new(path: PathBuf, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { path, interval, clock }
    }

    pub fn beat(&self) -> io::Result<()> {
        write_heartbeat(&self.path, self.clock.now_secs() as i64)
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(path = ?self.path, interval_secs = self.interval.as_secs(), "Heartbeat starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat() {
                        tracing::warn!(path = ?self.path, error = %e, "Failed to write heartbeat");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Heartbeat received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
