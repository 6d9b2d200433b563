//! Bridge counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters updated by the vehicle session and the dispatch loop.
#[derive(Debug, Default)]
pub struct BridgeCounters {
    commands_sent: AtomicU64,
    commands_dropped: AtomicU64,
    heartbeat_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnect_failures: AtomicU64,
    rejected_commands: AtomicU64,
    telemetry_losses: AtomicU64,
}

impl BridgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// A claimed command whose send failed. It is not retried.
    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// A telemetry stream ended without a stop being requested.
    pub fn record_telemetry_loss(&self) {
        self.telemetry_losses.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// A bus command that could not be turned into a [`Command`](crate::command::Command).
    pub fn record_rejected_command(&self) {
        self.rejected_commands.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Telemetry samples decoded and published.
    pub samples: u64,
    /// Telemetry messages the bus adapter refused or dropped.
    pub publish_errors: u64,
    /// Telemetry variables received that no mapping covers.
    pub unknown_variables: u64,
    /// Commands staged from the bus.
    pub commands_staged: u64,
    /// Unclaimed commands displaced by a newer one.
    pub commands_overwritten: u64,
    /// Bus commands with an unknown stamp or bad payload.
    pub commands_rejected: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub heartbeat_failures: u64,
    /// Telemetry streams that ended on their own.
    pub telemetry_losses: u64,
    pub reconnect_attempts: u64,
    pub reconnect_failures: u64,
}

impl BridgeCounters {
    /// Fill in the counters owned here; the rest are left to the caller.
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            commands_rejected: self.rejected_commands.load(Ordering::SeqCst),
            commands_sent: self.commands_sent.load(Ordering::SeqCst),
            commands_dropped: self.commands_dropped.load(Ordering::SeqCst),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::SeqCst),
            telemetry_losses: self.telemetry_losses.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            reconnect_failures: self.reconnect_failures.load(Ordering::SeqCst),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let counters = BridgeCounters::new();
        counters.record_command_sent();
        counters.record_command_sent();
        counters.record_command_dropped();
        counters.record_reconnect_attempt();
        counters.record_telemetry_loss();

        let stats = counters.snapshot();
        assert_eq!(stats.commands_sent, 2);
        assert_eq!(stats.commands_dropped, 1);
        assert_eq!(stats.reconnect_attempts, 1);
        assert_eq!(stats.telemetry_losses, 1);
        assert_eq!(stats.samples, 0);
    }
}
