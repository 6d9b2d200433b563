//! Vehicle session: owns the link and its telemetry stream.
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Closing -> Disconnected
//!                     ^             |
//!                     +-------------+  (link failure, via reconnect)
//! ```
//!
//! The link handle is replaced wholesale on reconnect and is never touched
//! by anything but the dispatch task.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::command::{Command, Pose};
use crate::config::CrazyflieConfig;
use crate::error::{LinkFailure, SessionError};
use crate::link::{ControlPacket, LinkConnector, TelemetryStream, TocItem, VehicleLink};
use crate::stats::BridgeCounters;
use crate::telemetry::TelemetryPipeline;

/// Lifecycle state of a [`VehicleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Connection to one vehicle.
pub struct VehicleSession<C: LinkConnector> {
    connector: C,
    config: CrazyflieConfig,
    pipeline: Arc<TelemetryPipeline>,
    pose: watch::Receiver<Pose>,
    counters: Arc<BridgeCounters>,
    link: Option<C::Link>,
    stream: Option<TelemetryStream>,
    /// Set when the current link was given a telemetry stream.
    stream_started: bool,
    state: watch::Sender<SessionState>,
    consecutive_failures: u32,
}

impl<C: LinkConnector> VehicleSession<C> {
    pub fn new(
        connector: C,
        config: CrazyflieConfig,
        pipeline: Arc<TelemetryPipeline>,
        counters: Arc<BridgeCounters>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let pose = pipeline.subscribe_pose();

        Self {
            connector,
            config,
            pipeline,
            pose,
            counters,
            link: None,
            stream: None,
            stream_started: false,
            state,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver following every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a live link exists.
    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming && self.link.is_some()
    }

    /// Whether a telemetry stream is still feeding the callback.
    pub fn has_telemetry_stream(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Whether a stream started on this link has ended without being asked to.
    ///
    /// Stays `false` when the link was opened without a stream because the
    /// vehicle offers none of the configured variables.
    pub fn telemetry_lost(&self) -> bool {
        self.stream_started && !self.has_telemetry_stream()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Session state changed");
            *current = state;
            true
        });
    }

    /// Open the link and start streaming telemetry.
    pub async fn connect(&mut self) -> Result<(), LinkFailure> {
        self.set_state(SessionState::Connecting);

        match self.open().await {
            Ok((link, stream)) => {
                self.link = Some(link);
                self.stream_started = stream.is_some();
                self.stream = stream;
                self.consecutive_failures = 0;
                self.set_state(SessionState::Streaming);
                info!(uri = %self.config.uri, "Vehicle connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<(C::Link, Option<TelemetryStream>), LinkFailure> {
        let mut link = self.connector.connect(&self.config.uri).await?;
        let offered = link.reset_telemetry_table().await?;

        let mut requested: Vec<TocItem> = Vec::new();
        for mapping in &self.config.telemetry.variables {
            let item = mapping.item();
            if offered.contains(&item) {
                requested.push(item);
            } else {
                warn!(variable = %item, "Vehicle does not offer telemetry variable");
            }
        }

        if requested.is_empty() {
            warn!("None of the configured telemetry variables are offered, streaming disabled");
            return Ok((link, None));
        }

        let stream = link
            .create_telemetry_stream(
                &requested,
                self.config.telemetry.period(),
                self.pipeline.callback(),
            )
            .await?;

        debug!(
            variables = requested.len(),
            period_ms = self.config.telemetry.period_ms,
            "Telemetry stream started"
        );
        Ok((link, Some(stream)))
    }

    fn release(&mut self) {
        self.stream = None;
        self.stream_started = false;
        self.link = None;
    }

    /// Drop the current link and stream.
    fn teardown(&mut self) {
        self.release();
        self.set_state(SessionState::Disconnected);
    }

    async fn transmit(&mut self, packet: ControlPacket) -> Result<(), LinkFailure> {
        let link = self.link.as_mut().ok_or(LinkFailure::NotConnected)?;
        let result = link.send(packet).await;

        if let Err(e) = &result {
            warn!(packet = packet.name(), error = %e, "Link failure, dropping session");
            self.teardown();
        }
        result
    }

    /// Translate `command` and send it.
    pub async fn send(&mut self, command: &Command) -> Result<(), LinkFailure> {
        let pose = *self.pose.borrow();
        let packet = command.to_packet(self.config.goto_policy, &pose);

        self.transmit(packet).await?;
        self.counters.record_command_sent();
        info!(command = %command, ?packet, "Command sent");
        Ok(())
    }

    /// Send a keep-alive.
    pub async fn heartbeat(&mut self) -> Result<(), LinkFailure> {
        self.transmit(ControlPacket::Ping).await?;
        trace!("Heartbeat");
        Ok(())
    }

    /// Discard the current link and make one connect attempt.
    ///
    /// Consecutive failures are spaced by the configured backoff. Once
    /// `max_attempts` consecutive attempts have failed,
    /// [`SessionError::ReconnectExhausted`] is returned.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        self.release();

        let reconnect = &self.config.reconnect;
        if let Some(max) = reconnect.max_attempts {
            if self.consecutive_failures >= max {
                self.set_state(SessionState::Disconnected);
                return Err(SessionError::ReconnectExhausted {
                    attempts: self.consecutive_failures,
                });
            }
        }

        self.set_state(SessionState::Connecting);
        let delay = reconnect.backoff(self.consecutive_failures);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::time::sleep(delay).await;
        }

        self.counters.record_reconnect_attempt();
        info!(uri = %self.config.uri, "Reconnecting to vehicle");

        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.consecutive_failures += 1;
                self.counters.record_reconnect_failure();
                warn!(
                    attempt = self.consecutive_failures,
                    error = %e,
                    "Reconnect failed"
                );

                match self.config.reconnect.max_attempts {
                    Some(max) if self.consecutive_failures >= max => {
                        Err(SessionError::ReconnectExhausted {
                            attempts: self.consecutive_failures,
                        })
                    }
                    _ => Err(e.into()),
                }
            }
        }
    }

    /// Land, stop and release the link. Never fails; errors are logged.
    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop().await;
        }
        self.stream_started = false;

        let Some(mut link) = self.link.take() else {
            self.set_state(SessionState::Disconnected);
            return;
        };

        self.set_state(SessionState::Closing);
        let close = &self.config.close;

        let land = ControlPacket::Land {
            height: 0.0,
            duration: std::time::Duration::from_millis(close.land_duration_ms),
        };
        if let Err(e) = link.send(land).await {
            warn!(error = %e, "Failed to send land on close");
        }
        tokio::time::sleep(std::time::Duration::from_millis(close.land_settle_ms)).await;

        if let Err(e) = link.send(ControlPacket::Stop).await {
            warn!(error = %e, "Failed to send stop on close");
        }
        tokio::time::sleep(std::time::Duration::from_millis(close.stop_settle_ms)).await;

        link.close().await;
        self.set_state(SessionState::Disconnected);
        info!(uri = %self.config.uri, "Vehicle session closed");
    }
}

impl<C: LinkConnector> fmt::Debug for VehicleSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VehicleSession")
            .field("uri", &self.config.uri)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusAdapter, CommandHandler, CommandSubscription};
    use crate::command::GoToPolicy;
    use crate::decoder::default_variables;
    use crate::error::BusError;
    use crate::shutdown::ShutdownCoordinator;
    use crate::sim::{SimConnector, SimVehicle};
    use flybridge_common::BusMessage;
    use std::time::Duration;

    struct NullBus;

    impl BusAdapter for NullBus {
        fn publish(&self, _: BusMessage, _: i64, _: u16) -> Result<(), BusError> {
            Ok(())
        }

        fn subscribe_commands(
            &self,
            _: u16,
            _: CommandHandler,
        ) -> Result<CommandSubscription, BusError> {
            Ok(CommandSubscription::new(()))
        }
    }

    fn session(vehicle: &SimVehicle, policy: GoToPolicy) -> VehicleSession<SimConnector> {
        let config = CrazyflieConfig::new("sim://cf1".parse().unwrap(), policy);
        let pipeline = Arc::new(TelemetryPipeline::new(
            &default_variables(),
            Arc::new(NullBus),
            0,
            Arc::new(ShutdownCoordinator::new()),
        ));
        VehicleSession::new(
            vehicle.connector(),
            config,
            pipeline,
            Arc::new(BridgeCounters::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_streams_and_heartbeats() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        let mut states = session.subscribe_state();

        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect().await.unwrap();

        assert_eq!(*states.borrow_and_update(), SessionState::Streaming);
        assert!(session.is_streaming());
        assert!(session.has_telemetry_stream());

        session.heartbeat().await.unwrap();
        assert_eq!(vehicle.pings(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_tears_down() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.connect().await.unwrap();

        vehicle.fail_next_sends(1);
        let err = session.send(&Command::Stop).await.unwrap_err();

        assert!(matches!(err, LinkFailure::Transport(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_telemetry_stream());
        assert_eq!(
            session.heartbeat().await.unwrap_err(),
            LinkFailure::NotConnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_variables_are_skipped() {
        let vehicle = SimVehicle::new();
        vehicle.remove_variable("pm", "vbat");
        let mut session = session(&vehicle, GoToPolicy::Absolute);

        session.connect().await.unwrap();
        assert_eq!(
            vehicle.streamed_variables().len(),
            default_variables().len() - 1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.config.reconnect.max_attempts = Some(2);
        session.connect().await.unwrap();

        vehicle.fail_next_connects(10);
        assert!(matches!(
            session.reconnect().await,
            Err(SessionError::Link(_))
        ));
        assert!(matches!(
            session.reconnect().await,
            Err(SessionError::ReconnectExhausted { attempts: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_between_failures() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        vehicle.fail_next_connects(2);

        let start = tokio::time::Instant::now();
        assert!(session.reconnect().await.is_err());
        assert!(session.reconnect().await.is_err());
        session.reconnect().await.unwrap();

        // 0 + 100ms + 200ms
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(session.is_streaming());
        assert_eq!(session.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_is_reported_lost() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.connect().await.unwrap();
        assert!(!session.telemetry_lost());

        vehicle.end_telemetry_stream();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(session.telemetry_lost());
        assert!(session.is_streaming());
        session.reconnect().await.unwrap();
        assert!(!session.telemetry_lost());
        assert!(session.has_telemetry_stream());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_offered_variables_is_not_a_lost_stream() {
        let vehicle = SimVehicle::new();
        for item in default_variables() {
            vehicle.remove_variable(&item.group, &item.name);
        }
        let mut session = session(&vehicle, GoToPolicy::Absolute);

        session.connect().await.unwrap();
        assert!(session.is_streaming());
        assert!(!session.has_telemetry_stream());
        assert!(!session.telemetry_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_connecting_during_backoff() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.connect().await.unwrap();

        vehicle.fail_next_connects(2);
        assert!(session.reconnect().await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);

        // The second attempt waits 100ms first.
        let waiting =
            tokio::time::timeout(Duration::from_millis(50), session.reconnect()).await;
        assert!(waiting.is_err());
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_the_stream_first() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let before = vehicle.callback_invocations();

        session.close().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(vehicle.callback_invocations(), before);
        assert!(!session.has_telemetry_stream());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lands_then_stops() {
        let vehicle = SimVehicle::new();
        let mut session = session(&vehicle, GoToPolicy::Absolute);
        session.connect().await.unwrap();

        let start = tokio::time::Instant::now();
        session.close().await;

        assert!(start.elapsed() >= Duration::from_millis(2750));
        assert_eq!(session.state(), SessionState::Disconnected);
        let packets = vehicle.packets();
        assert!(matches!(
            packets.as_slice(),
            [.., ControlPacket::Land { height, .. }, ControlPacket::Stop] if *height == 0.0
        ));
        assert!(vehicle.is_closed());
    }
}
