//! Lease keep-alive.
//!
//! The server expires an export lease that sees no progress reports within its
//! timeout. [`Heartbeat`] runs on its own thread and reports the shared
//! progress percentage on a fixed interval until it is stopped, the lease
//! reaches a terminal state, or a report fails.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::Lease;
use crate::progress::ProgressState;

/// Default interval between progress reports.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running heartbeat thread.
pub struct Heartbeat {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start reporting `progress` to `lease` every `interval`.
    ///
    /// The first report is sent immediately.
    pub fn start(lease: Arc<dyn Lease>, progress: Arc<ProgressState>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("lease-heartbeat".into())
            .spawn(move || loop {
                match lease.state() {
                    Ok(state) if state.is_terminal() => {
                        debug!(%state, "lease is terminal, heartbeat exiting");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "failed to read lease state, heartbeat exiting");
                        return;
                    }
                }

                let pct = progress.percent();
                debug!(percent = pct, "updating lease progress");
                if let Err(e) = lease.report_progress(pct) {
                    warn!(error = %e, "failed to report lease progress, heartbeat exiting");
                    return;
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn heartbeat thread, lease will not be kept alive");
                None
            }
        };

        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Returns true while the heartbeat thread has not exited.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to stop and wait for it to exit.
    ///
    /// Safe to call more than once. A report already in flight completes
    /// before this returns.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The receiver is gone if the thread already exited on its own.
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
