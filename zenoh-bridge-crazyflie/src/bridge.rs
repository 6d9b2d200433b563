//! Operational surface: [`Bridge::start`] and [`Bridge::request_stop`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use flybridge_common::{BridgeConfig, CommandEnvelope};

use crate::bus::{BusAdapter, CommandHandler, CommandSubscription};
use crate::command::{Command, Pose};
use crate::config::CrazyflieBridgeConfig;
use crate::dispatch::DispatchLoop;
use crate::error::{BridgeError, Result};
use crate::inbox::CommandInbox;
use crate::link::LinkConnector;
use crate::session::{SessionState, VehicleSession};
use crate::shutdown::ShutdownCoordinator;
use crate::stats::{BridgeCounters, BridgeStats};
use crate::telemetry::TelemetryPipeline;

type DispatchResult<C> = std::result::Result<VehicleSession<C>, BridgeError>;

/// A running bridge between one vehicle and the bus.
///
/// Not restartable: once stopped, start a new one.
pub struct Bridge<C: LinkConnector> {
    inbox: Arc<CommandInbox>,
    shutdown: Arc<ShutdownCoordinator>,
    pipeline: Arc<TelemetryPipeline>,
    counters: Arc<BridgeCounters>,
    state: watch::Receiver<SessionState>,
    subscription: Option<CommandSubscription>,
    dispatch: JoinHandle<DispatchResult<C>>,
    drain_timeout: Duration,
}

impl<C: LinkConnector> Bridge<C> {
    /// Connect to the vehicle, subscribe to commands and start dispatching.
    ///
    /// Fails with [`BridgeError::Config`] on an invalid configuration and
    /// with [`BridgeError::Startup`] when the vehicle cannot be reached.
    pub async fn start(
        config: &CrazyflieBridgeConfig,
        connector: C,
        bus: Arc<dyn BusAdapter>,
    ) -> Result<Self> {
        config.validate()?;
        let cf = &config.crazyflie;
        let channel = config.bus.channel;

        let shutdown = Arc::new(ShutdownCoordinator::new());
        let inbox = Arc::new(CommandInbox::new());
        let counters = Arc::new(BridgeCounters::new());
        let pipeline = Arc::new(TelemetryPipeline::new(
            &cf.telemetry.variables,
            Arc::clone(&bus),
            channel,
            Arc::clone(&shutdown),
        ));

        let mut session = VehicleSession::new(
            connector,
            cf.clone(),
            Arc::clone(&pipeline),
            Arc::clone(&counters),
        );
        session.connect().await.map_err(BridgeError::Startup)?;

        let handler = command_handler(Arc::clone(&inbox), Arc::clone(&counters));
        let subscription = match bus.subscribe_commands(channel, handler) {
            Ok(subscription) => subscription,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };

        let state = session.subscribe_state();
        let dispatch = DispatchLoop::new(
            session,
            Arc::clone(&inbox),
            Arc::clone(&shutdown),
            Arc::clone(&counters),
            cf.dispatch_interval(),
        );
        let dispatch = tokio::spawn(dispatch.run());

        info!(
            uri = %cf.uri,
            channel,
            goto_policy = %cf.goto_policy,
            "Bridge started"
        );

        Ok(Self {
            inbox,
            shutdown,
            pipeline,
            counters,
            state,
            subscription: Some(subscription),
            dispatch,
            drain_timeout: cf.drain_timeout(),
        })
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver following the vehicle session state.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Last known vehicle pose.
    pub fn pose(&self) -> Pose {
        self.pipeline.pose()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            samples: self.pipeline.samples(),
            publish_errors: self.pipeline.publish_errors(),
            unknown_variables: self.pipeline.unknown_variables(),
            commands_staged: self.inbox.staged(),
            commands_overwritten: self.inbox.overwrites(),
            ..self.counters.snapshot()
        }
    }

    /// Drain telemetry, stop dispatching and close the vehicle session.
    ///
    /// When this returns no telemetry callback runs any more and the session
    /// is [`SessionState::Disconnected`].
    pub async fn request_stop(mut self) -> Result<BridgeStats> {
        info!("Stopping bridge");
        self.subscription.take();

        if tokio::time::timeout(self.drain_timeout, self.shutdown.request_stop())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Telemetry did not drain in time"
            );
            self.shutdown.mark_drained();
        }

        let outcome = (&mut self.dispatch).await;
        self.finish(outcome).await
    }

    /// Run until `signal` completes, then stop.
    ///
    /// Returns early with the error if the dispatch loop fails first.
    pub async fn run_until<F>(mut self, signal: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()>,
    {
        let finished = tokio::select! {
            _ = signal => None,
            outcome = &mut self.dispatch => Some(outcome),
        };

        match finished {
            None => self.request_stop().await,
            Some(outcome) => {
                self.subscription.take();
                self.finish(outcome).await
            }
        }
    }

    async fn finish(
        &mut self,
        outcome: std::result::Result<DispatchResult<C>, tokio::task::JoinError>,
    ) -> Result<BridgeStats> {
        let mut session = match outcome {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!(error = %e, "Bridge stopped on error");
                return Err(e);
            }
            Err(e) => return Err(BridgeError::Dispatch(e.to_string())),
        };

        session.close().await;

        let stats = self.stats();
        info!(
            samples = stats.samples,
            commands_sent = stats.commands_sent,
            commands_overwritten = stats.commands_overwritten,
            reconnects = stats.reconnect_attempts,
            "Bridge stopped"
        );
        Ok(stats)
    }
}

impl<C: LinkConnector> Drop for Bridge<C> {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

/// Turn bus envelopes into staged commands.
fn command_handler(inbox: Arc<CommandInbox>, counters: Arc<BridgeCounters>) -> CommandHandler {
    Arc::new(move |envelope: CommandEnvelope, source: &str| {
        match Command::from_envelope(&envelope) {
            Ok(command) => {
                inbox.stage(command, source);
            }
            Err(e) => {
                counters.record_rejected_command();
                warn!(source = %source, error = %e, "Rejected command");
            }
        }
    })
}
