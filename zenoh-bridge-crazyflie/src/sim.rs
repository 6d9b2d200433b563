//! Simulated Crazyflie.
//!
//! Answers on `sim://<name>` URIs. Control packets are applied instantly to a
//! simple kinematic state, telemetry is streamed from it on a tokio interval,
//! and connects, sends and heartbeats can be made to fail on demand.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::decoder::default_variables;
use crate::error::LinkFailure;
use crate::link::{
    ControlPacket, LinkConnector, LinkUri, TelemetryCallback, TelemetryStream, TocItem,
    VariableTable, VariableValue, VehicleLink,
};

/// URI scheme served by [`SimConnector`].
pub const SIM_SCHEME: &str = "sim";

/// Something that happened on the simulated link, in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    Connected,
    Ping,
    Packet(ControlPacket),
    /// A send that was made to fail; carries the packet name.
    SendFailed(&'static str),
    Closed,
}

#[derive(Debug)]
struct SimState {
    x: f64,
    y: f64,
    z: f64,
    roll_deg: f64,
    pitch_deg: f64,
    yaw_deg: f64,
    vx: f64,
    vy: f64,
    yaw_rate: f64,
    battery: f64,

    toc: Vec<TocItem>,
    injected: Vec<(TocItem, VariableValue)>,
    streamed: Vec<TocItem>,

    events: Vec<SimEvent>,
    packets: Vec<ControlPacket>,
    pings: u64,
    connects: u64,
    callbacks: u64,
    closed: bool,
    end_stream: bool,

    fail_connects: u32,
    fail_sends: u32,
    fail_commands: u32,
    fail_heartbeats: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            vx: 0.0,
            vy: 0.0,
            yaw_rate: 0.0,
            battery: 4.2,
            toc: default_variables().iter().map(|v| v.item()).collect(),
            injected: Vec::new(),
            streamed: Vec::new(),
            events: Vec::new(),
            packets: Vec::new(),
            pings: 0,
            connects: 0,
            callbacks: 0,
            closed: false,
            end_stream: false,
            fail_connects: 0,
            fail_sends: 0,
            fail_commands: 0,
            fail_heartbeats: 0,
        }
    }
}

impl SimState {
    fn value(&self, item: &TocItem) -> Option<VariableValue> {
        let v = match (item.group.as_str(), item.name.as_str()) {
            ("stateEstimate", "x") => self.x,
            ("stateEstimate", "y") => self.y,
            ("stateEstimate", "z") => self.z,
            ("stabilizer", "roll") => self.roll_deg,
            ("stabilizer", "pitch") => self.pitch_deg,
            ("stabilizer", "yaw") => self.yaw_deg,
            ("pm", "vbat") => self.battery,
            _ => return None,
        };
        Some(VariableValue::F32(v as f32))
    }

    fn table(&self, variables: &[TocItem]) -> VariableTable {
        let mut table: VariableTable = variables
            .iter()
            .filter_map(|item| self.value(item).map(|v| (item.clone(), v)))
            .collect();
        table.extend(self.injected.iter().cloned());
        table
    }

    fn step(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        let yaw = self.yaw_deg.to_radians();

        // Hover velocities are in the body frame.
        self.x += (self.vx * yaw.cos() - self.vy * yaw.sin()) * dt;
        self.y += (self.vx * yaw.sin() + self.vy * yaw.cos()) * dt;
        self.yaw_deg += (self.yaw_rate * dt).to_degrees();
        self.battery = (self.battery - 0.0001 * dt).max(3.0);
    }

    fn apply(&mut self, packet: ControlPacket) {
        match packet {
            ControlPacket::Ping => return,
            ControlPacket::Takeoff { height, .. } | ControlPacket::Land { height, .. } => {
                self.halt();
                self.z = height as f64;
            }
            ControlPacket::Stop => self.halt(),
            ControlPacket::GoTo { x, y, z, yaw, .. } => {
                self.halt();
                self.x = x as f64;
                self.y = y as f64;
                self.z = z as f64;
                self.yaw_deg = (yaw as f64).to_degrees();
            }
            ControlPacket::Hover {
                vx,
                vy,
                yaw_rate,
                z,
            } => {
                self.vx = vx as f64;
                self.vy = vy as f64;
                self.yaw_rate = yaw_rate as f64;
                self.z = z as f64;
            }
        }
        self.packets.push(packet);
        self.events.push(SimEvent::Packet(packet));
    }

    fn halt(&mut self) {
        self.vx = 0.0;
        self.vy = 0.0;
        self.yaw_rate = 0.0;
    }
}

/// Handle to a simulated vehicle, shared with its connector and links.
#[derive(Debug, Clone, Default)]
pub struct SimVehicle {
    state: Arc<Mutex<SimState>>,
}

impl SimVehicle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            vehicle: self.clone(),
        }
    }

    /// Place the vehicle; yaw in degrees, as the firmware reports it.
    pub fn set_pose(&self, x: f64, y: f64, z: f64, yaw_deg: f64) {
        let mut state = self.state.lock();
        state.x = x;
        state.y = y;
        state.z = z;
        state.yaw_deg = yaw_deg;
    }

    /// Current `(x, y, z, yaw_deg)`.
    pub fn pose(&self) -> (f64, f64, f64, f64) {
        let state = self.state.lock();
        (state.x, state.y, state.z, state.yaw_deg)
    }

    /// Control packets received, keep-alives excluded.
    pub fn packets(&self) -> Vec<ControlPacket> {
        self.state.lock().packets.clone()
    }

    /// Everything that happened on the link so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    pub fn pings(&self) -> u64 {
        self.state.lock().pings
    }

    /// Successful connects so far.
    pub fn connects(&self) -> u64 {
        self.state.lock().connects
    }

    /// Telemetry callback invocations so far.
    pub fn callback_invocations(&self) -> u64 {
        self.state.lock().callbacks
    }

    /// Variables requested by the most recent stream.
    pub fn streamed_variables(&self) -> Vec<TocItem> {
        self.state.lock().streamed.clone()
    }

    /// Whether the last link was closed gracefully.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make the next `n` connects fail the handshake.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_connects = n;
    }

    /// Make the next `n` packet sends fail, keep-alives included.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().fail_sends = n;
    }

    /// Make the next `n` control packets fail, keep-alives excluded.
    pub fn fail_next_commands(&self, n: u32) {
        self.state.lock().fail_commands = n;
    }

    /// Make the next `n` keep-alives fail.
    pub fn fail_next_heartbeats(&self, n: u32) {
        self.state.lock().fail_heartbeats = n;
    }

    /// Drop a variable from the table of contents.
    pub fn remove_variable(&self, group: &str, name: &str) {
        let item = TocItem::new(group, name);
        self.state.lock().toc.retain(|i| *i != item);
    }

    /// End the running telemetry stream as if the radio stopped receiving.
    /// The link itself stays up.
    pub fn end_telemetry_stream(&self) {
        self.state.lock().end_stream = true;
    }

    /// Include a variable in every sample, requested or not.
    pub fn inject_variable(&self, group: &str, name: &str, value: VariableValue) {
        self.state
            .lock()
            .injected
            .push((TocItem::new(group, name), value));
    }
}

/// Connects to a [`SimVehicle`].
#[derive(Debug, Clone)]
pub struct SimConnector {
    vehicle: SimVehicle,
}

impl LinkConnector for SimConnector {
    type Link = SimLink;

    async fn connect(&self, uri: &LinkUri) -> Result<SimLink, LinkFailure> {
        if uri.scheme() != SIM_SCHEME {
            return Err(LinkFailure::Handshake {
                uri: uri.to_string(),
                reason: format!("unsupported scheme '{}'", uri.scheme()),
            });
        }

        let mut state = self.vehicle.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(LinkFailure::Handshake {
                uri: uri.to_string(),
                reason: "no answer".to_string(),
            });
        }

        state.connects += 1;
        state.closed = false;
        state.events.push(SimEvent::Connected);
        debug!(uri = %uri, "Simulated vehicle connected");

        Ok(SimLink {
            vehicle: self.vehicle.clone(),
        })
    }
}

/// Link to a [`SimVehicle`].
#[derive(Debug)]
pub struct SimLink {
    vehicle: SimVehicle,
}

impl VehicleLink for SimLink {
    async fn reset_telemetry_table(&mut self) -> Result<Vec<TocItem>, LinkFailure> {
        let mut state = self.vehicle.state.lock();
        state.streamed.clear();
        Ok(state.toc.clone())
    }

    async fn create_telemetry_stream(
        &mut self,
        variables: &[TocItem],
        period: Duration,
        mut callback: TelemetryCallback,
    ) -> Result<TelemetryStream, LinkFailure> {
        let variables = variables.to_vec();
        self.vehicle.state.lock().streamed = variables.clone();

        let vehicle = self.vehicle.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let table = {
                    let mut state = vehicle.state.lock();
                    if std::mem::take(&mut state.end_stream) {
                        None
                    } else {
                        state.step(period);
                        state.callbacks += 1;
                        Some(state.table(&variables))
                    }
                };
                let Some(table) = table else {
                    debug!("Simulated telemetry stream lost");
                    break;
                };

                if !callback(&table, period) {
                    debug!("Simulated telemetry stream stopped by callback");
                    break;
                }
            }
        });

        Ok(TelemetryStream::from_task(task))
    }

    async fn send(&mut self, packet: ControlPacket) -> Result<(), LinkFailure> {
        let mut state = self.vehicle.state.lock();

        if state.closed {
            return Err(LinkFailure::transport("link closed"));
        }
        let is_ping = packet == ControlPacket::Ping;
        let fail = if state.fail_sends > 0 {
            state.fail_sends -= 1;
            true
        } else if is_ping && state.fail_heartbeats > 0 {
            state.fail_heartbeats -= 1;
            true
        } else if !is_ping && state.fail_commands > 0 {
            state.fail_commands -= 1;
            true
        } else {
            false
        };

        if fail {
            state.events.push(SimEvent::SendFailed(packet.name()));
            return Err(LinkFailure::transport("radio packet not acknowledged"));
        }

        if is_ping {
            state.pings += 1;
            state.events.push(SimEvent::Ping);
        } else {
            state.apply(packet);
        }
        Ok(())
    }

    async fn close(self) {
        let mut state = self.vehicle.state.lock();
        state.closed = true;
        state.events.push(SimEvent::Closed);
        drop(state);
        debug!("Simulated vehicle link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_rejects_other_schemes() {
        let vehicle = SimVehicle::new();
        let uri: LinkUri = "radio://0/80/2M".parse().unwrap();

        let err = vehicle.connector().connect(&uri).await.unwrap_err();
        assert!(matches!(err, LinkFailure::Handshake { .. }));
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let vehicle = SimVehicle::new();
        let uri: LinkUri = "sim://cf1".parse().unwrap();
        vehicle.fail_next_connects(1);

        assert!(vehicle.connector().connect(&uri).await.is_err());
        assert!(vehicle.connector().connect(&uri).await.is_ok());
        assert_eq!(vehicle.connects(), 1);
    }

    #[tokio::test]
    async fn test_packets_move_the_vehicle() {
        let vehicle = SimVehicle::new();
        let mut link = vehicle
            .connector()
            .connect(&"sim://cf1".parse().unwrap())
            .await
            .unwrap();

        link.send(ControlPacket::Takeoff {
            height: 0.5,
            duration: Duration::from_secs(2),
        })
        .await
        .unwrap();
        assert_eq!(vehicle.pose().2, 0.5);

        link.send(ControlPacket::GoTo {
            x: 1.0,
            y: -1.0,
            z: 1.0,
            yaw: std::f32::consts::FRAC_PI_2,
            duration: Duration::from_secs(1),
        })
        .await
        .unwrap();
        let (x, y, z, yaw) = vehicle.pose();
        assert_eq!((x, y, z), (1.0, -1.0, 1.0));
        assert!((yaw - 90.0).abs() < 1e-4);

        link.send(ControlPacket::Ping).await.unwrap();
        assert_eq!(vehicle.pings(), 1);
        assert_eq!(vehicle.packets().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_when_callback_declines() {
        let vehicle = SimVehicle::new();
        let mut link = vehicle
            .connector()
            .connect(&"sim://cf1".parse().unwrap())
            .await
            .unwrap();
        let toc = link.reset_telemetry_table().await.unwrap();
        assert_eq!(toc.len(), 7);

        let calls = Arc::new(AtomicU64::new(0));
        let counted = Arc::clone(&calls);
        let stream = link
            .create_telemetry_stream(
                &toc,
                Duration::from_millis(10),
                Box::new(move |table: &VariableTable, _: Duration| {
                    assert_eq!(table.len(), 7);
                    counted.fetch_add(1, Ordering::SeqCst) < 2
                }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(stream.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(vehicle.callback_invocations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_integrates_velocity() {
        let vehicle = SimVehicle::new();
        let mut link = vehicle
            .connector()
            .connect(&"sim://cf1".parse().unwrap())
            .await
            .unwrap();
        let toc = link.reset_telemetry_table().await.unwrap();
        let _stream = link
            .create_telemetry_stream(
                &toc,
                Duration::from_millis(100),
                Box::new(|_: &VariableTable, _: Duration| true),
            )
            .await
            .unwrap();

        link.send(ControlPacket::Hover {
            vx: 1.0,
            vy: 0.0,
            yaw_rate: 0.0,
            z: 0.4,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1050)).await;

        let (x, _, z, _) = vehicle.pose();
        assert!((x - 1.0).abs() < 1e-6, "x = {x}");
        assert_eq!(z, 0.4f32 as f64);
    }
}
