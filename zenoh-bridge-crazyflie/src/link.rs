//! Vehicle link seam.
//!
//! The radio driver is a collaborator: it owns packet framing, the telemetry
//! table of contents and the streaming of log blocks. The bridge only needs
//! the operations below, so any driver (or the [`sim`](crate::sim) link) can
//! sit behind [`LinkConnector`] / [`VehicleLink`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{InvalidUri, LinkFailure};

/// Link URI such as `radio://0/80/2M/E7E7E7E7E7` or `sim://cf1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkUri {
    raw: String,
    scheme_len: usize,
}

impl LinkUri {
    /// The scheme, e.g. `radio` or `sim`.
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    /// Everything after `://`.
    pub fn address(&self) -> &str {
        &self.raw[self.scheme_len + 3..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for LinkUri {
    type Err = InvalidUri;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scheme_len = s.find("://").ok_or_else(|| InvalidUri(s.to_string()))?;
        let scheme = &s[..scheme_len];
        let valid_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');

        if !valid_scheme || s.len() == scheme_len + 3 {
            return Err(InvalidUri(s.to_string()));
        }

        Ok(Self {
            raw: s.to_string(),
            scheme_len,
        })
    }
}

impl TryFrom<String> for LinkUri {
    type Error = InvalidUri;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinkUri> for String {
    fn from(uri: LinkUri) -> Self {
        uri.raw
    }
}

impl fmt::Display for LinkUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Identifier of a telemetry variable in the vehicle's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TocItem {
    pub group: String,
    pub name: String,
}

impl TocItem {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TocItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// A typed telemetry value as reported by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
}

impl VariableValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            VariableValue::U8(v) => v as f64,
            VariableValue::U16(v) => v as f64,
            VariableValue::U32(v) => v as f64,
            VariableValue::I8(v) => v as f64,
            VariableValue::I16(v) => v as f64,
            VariableValue::I32(v) => v as f64,
            VariableValue::F32(v) => v as f64,
        }
    }
}

/// One telemetry sample: every streamed variable with its latest value.
pub type VariableTable = BTreeMap<TocItem, VariableValue>;

/// Invoked by the link for every telemetry sample.
///
/// Receives the sample and the stream period. Returning `false` asks the link
/// to stop the stream; the callback is not invoked again afterwards.
pub type TelemetryCallback = Box<dyn FnMut(&VariableTable, Duration) -> bool + Send + 'static>;

/// Control primitive understood by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlPacket {
    /// Keep-alive. The vehicle drops the link when it hears nothing for a
    /// few tens of milliseconds.
    Ping,
    Takeoff {
        height: f32,
        duration: Duration,
    },
    Land {
        height: f32,
        duration: Duration,
    },
    Stop,
    /// Absolute go-to setpoint; yaw in radians.
    GoTo {
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
        duration: Duration,
    },
    Hover {
        vx: f32,
        vy: f32,
        yaw_rate: f32,
        z: f32,
    },
}

impl ControlPacket {
    pub fn name(&self) -> &'static str {
        match self {
            ControlPacket::Ping => "ping",
            ControlPacket::Takeoff { .. } => "takeoff",
            ControlPacket::Land { .. } => "land",
            ControlPacket::Stop => "stop",
            ControlPacket::GoTo { .. } => "goto",
            ControlPacket::Hover { .. } => "hover",
        }
    }
}

/// Handle to a running telemetry stream.
///
/// The stream stops when the callback returns `false` or when the handle is
/// dropped, whichever comes first.
#[derive(Debug)]
pub struct TelemetryStream {
    task: JoinHandle<()>,
}

impl TelemetryStream {
    /// Wrap the task that drives the callback.
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Whether the stream has ended, on its own or through its callback.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the stream and wait until its callback can no longer run.
    pub async fn stop(mut self) {
        self.task.abort();
        if let Err(e) = (&mut self.task).await {
            if e.is_panic() {
                tracing::warn!(error = %e, "Telemetry stream task panicked");
            }
        }
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Opens links to vehicles.
pub trait LinkConnector: Send + Sync + 'static {
    type Link: VehicleLink;

    /// Establish a link. Fails with [`LinkFailure::Handshake`] when the
    /// vehicle does not answer.
    fn connect(
        &self,
        uri: &LinkUri,
    ) -> impl Future<Output = Result<Self::Link, LinkFailure>> + Send;
}

/// A live link to one vehicle.
pub trait VehicleLink: Send + Sized + 'static {
    /// Reset the vehicle's log configuration and fetch its table of contents.
    fn reset_telemetry_table(
        &mut self,
    ) -> impl Future<Output = Result<Vec<TocItem>, LinkFailure>> + Send;

    /// Start streaming `variables` every `period`, feeding `callback`.
    fn create_telemetry_stream(
        &mut self,
        variables: &[TocItem],
        period: Duration,
        callback: TelemetryCallback,
    ) -> impl Future<Output = Result<TelemetryStream, LinkFailure>> + Send;

    /// Transmit one control packet.
    fn send(&mut self, packet: ControlPacket)
    -> impl Future<Output = Result<(), LinkFailure>> + Send;

    /// Release the link.
    fn close(self) -> impl Future<Output = ()> + Send;
}
