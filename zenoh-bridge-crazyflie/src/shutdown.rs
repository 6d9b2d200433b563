//! Drained shutdown handshake.
//!
//! Stopping must not race the telemetry callback: the terminating path sets
//! `stop_requested`, the callback observes it on its next invocation, marks
//! the stream `drained` and asks the link to stop. Only then is it safe to
//! close the vehicle session. Both flags live behind one lock and only ever
//! go from `false` to `true`.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// Snapshot of the shutdown flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownState {
    pub stop_requested: bool,
    pub drained: bool,
}

/// Coordinates the stop request with the final telemetry callback.
///
/// Shared by `Arc` between the telemetry callback, the dispatch loop and the
/// caller of [`Bridge::request_stop`](crate::bridge::Bridge::request_stop).
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    drained: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `stop_requested` without waiting.
    ///
    /// Returns `true` if this call made the transition.
    pub fn signal_stop(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.stop_requested;
        state.stop_requested = true;
        first
    }

    /// Request a stop and wait until the telemetry stream is drained.
    pub async fn request_stop(&self) {
        if self.signal_stop() {
            debug!("Stop requested, waiting for telemetry to drain");
        }
        self.wait_drained().await;
    }

    /// Wait until `drained` is set.
    pub async fn wait_drained(&self) {
        loop {
            // Register before checking so a concurrent notify is not lost.
            let notified = self.drained.notified();
            if self.state.lock().drained {
                return;
            }
            notified.await;
        }
    }

    /// Called from every telemetry callback.
    ///
    /// Returns `true` to keep streaming. Once a stop is requested it marks the
    /// stream drained and returns `false`.
    pub fn observe_from_callback(&self) -> bool {
        let mut state = self.state.lock();
        if !state.stop_requested {
            return true;
        }

        if !state.drained {
            state.drained = true;
            drop(state);
            debug!("Telemetry drained");
            self.drained.notify_waiters();
        }
        false
    }

    /// Mark the stream drained when it no longer exists (link gone).
    pub fn mark_drained(&self) {
        let mut state = self.state.lock();
        if state.drained {
            return;
        }
        state.drained = true;
        drop(state);
        self.drained.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    pub fn is_drained(&self) -> bool {
        self.state.lock().drained
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }
}
