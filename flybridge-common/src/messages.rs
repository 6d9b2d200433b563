//! Messages exchanged with the bus.
//!
//! Outbound, the bridge publishes one [`Frame`] and one [`VehicleState`] per
//! telemetry sample, each wrapped in a [`TelemetryEnvelope`]. Inbound, command
//! producers publish a [`CommandEnvelope`] whose `sender_stamp` selects the
//! command kind and whose payload carries that kind's fields.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Position and orientation of the vehicle.
///
/// Angles are in radians. A field is `None` when the vehicle did not report
/// the underlying variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
}

/// Housekeeping state of the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Battery voltage in volts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
    /// Current heading in radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
}

/// A typed message published by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    Frame(Frame),
    VehicleState(VehicleState),
}

impl BusMessage {
    /// Key expression suffix for this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Frame(_) => "frame",
            BusMessage::VehicleState(_) => "state",
        }
    }
}

/// Outbound envelope carrying the sample time and the channel (frame id).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    /// Unix epoch milliseconds when the sample was taken.
    pub timestamp: i64,
    /// Channel identifying which vehicle produced the sample.
    pub channel: u16,
    pub message: BusMessage,
}

/// Inbound command as published by a command producer.
///
/// `sender_stamp` selects the command kind:
/// `0` takeoff, `1` land, `2` stop, `3` go-to, `4` hover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub sender_stamp: u32,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: CommandPayload,
}

impl CommandEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(sender_stamp: u32, payload: CommandPayload) -> Self {
        Self {
            sender_stamp,
            timestamp: current_timestamp_millis(),
            payload,
        }
    }
}

/// Union of all command fields. Each command kind reads only its own subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPayload {
    /// Target height in metres (takeoff, land).
    pub height: f32,
    /// Manoeuvre duration in seconds (takeoff, land, go-to).
    pub time: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Heading in radians (go-to).
    pub yaw: f32,
    /// Velocity in m/s (hover).
    pub vx: f32,
    pub vy: f32,
    /// Yaw rate in rad/s (hover).
    pub yaw_rate: f32,
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
