//! Dispatch loop: the only task that talks to the vehicle.
//!
//! Every iteration sends a keep-alive and, unless a stop is in progress,
//! claims and sends at most one staged command. Link failures, on the send
//! side or a telemetry stream that dies, cost exactly one reconnect attempt
//! before the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, SessionError};
use crate::inbox::CommandInbox;
use crate::link::LinkConnector;
use crate::session::VehicleSession;
use crate::shutdown::ShutdownCoordinator;
use crate::stats::BridgeCounters;

pub struct DispatchLoop<C: LinkConnector> {
    session: VehicleSession<C>,
    inbox: Arc<CommandInbox>,
    shutdown: Arc<ShutdownCoordinator>,
    counters: Arc<BridgeCounters>,
    interval: Duration,
}

impl<C: LinkConnector> DispatchLoop<C> {
    pub fn new(
        session: VehicleSession<C>,
        inbox: Arc<CommandInbox>,
        shutdown: Arc<ShutdownCoordinator>,
        counters: Arc<BridgeCounters>,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            inbox,
            shutdown,
            counters,
            interval,
        }
    }

    /// Run until the telemetry stream is drained after a stop request.
    ///
    /// Hands the session back so the caller can close it. Fails only when
    /// reconnecting is no longer allowed.
    pub async fn run(mut self) -> Result<VehicleSession<C>, BridgeError> {
        info!(interval_ms = self.interval.as_millis() as u64, "Dispatch loop started");

        loop {
            if self.shutdown.is_stop_requested()
                && (self.shutdown.is_drained() || !self.session.has_telemetry_stream())
            {
                // Nothing left to drain when there is no stream.
                self.shutdown.mark_drained();
                break;
            }

            if let Err(e) = self.iterate().await {
                error!(error = %e, "Dispatch loop giving up");
                self.shutdown.mark_drained();
                return Err(e.into());
            }

            tokio::time::sleep(self.interval).await;
        }

        info!("Dispatch loop stopped");
        Ok(self.session)
    }

    async fn iterate(&mut self) -> Result<(), SessionError> {
        if !self.session.is_streaming() {
            return self.reconnect().await;
        }

        // A stream ending while no stop is requested means the link stopped
        // receiving.
        if !self.shutdown.is_stop_requested() && self.session.telemetry_lost() {
            self.counters.record_telemetry_loss();
            warn!("Telemetry stream ended unexpectedly");
            return self.reconnect().await;
        }

        if let Err(e) = self.session.heartbeat().await {
            self.counters.record_heartbeat_failure();
            warn!(error = %e, "Heartbeat failed");
            return self.reconnect().await;
        }

        if self.shutdown.is_stop_requested() {
            return Ok(());
        }

        if let Some(command) = self.inbox.try_claim() {
            if let Err(e) = self.session.send(&command).await {
                // At most once: a claimed command is not re-sent.
                self.counters.record_command_dropped();
                warn!(command = %command, error = %e, "Command dropped after link failure");
                return self.reconnect().await;
            }
        }

        Ok(())
    }

    /// One reconnect attempt. Link failures are absorbed, the next iteration
    /// tries again.
    async fn reconnect(&mut self) -> Result<(), SessionError> {
        match self.session.reconnect().await {
            Ok(()) => {
                debug!("Reconnected");
                Ok(())
            }
            Err(SessionError::Link(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
