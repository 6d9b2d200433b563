//! Outbound telemetry path: link callback -> decoder -> bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::bus::BusAdapter;
use crate::command::Pose;
use crate::decoder::{TelemetryDecoder, VariableMapping};
use crate::link::{TelemetryCallback, VariableTable};
use crate::shutdown::ShutdownCoordinator;

/// Shared state behind the telemetry callback.
///
/// One pipeline lives for the whole bridge; each (re)connect installs a fresh
/// callback that feeds into it.
pub struct TelemetryPipeline {
    decoder: Mutex<TelemetryDecoder>,
    bus: Arc<dyn BusAdapter>,
    channel: u16,
    shutdown: Arc<ShutdownCoordinator>,
    pose: watch::Sender<Pose>,
    samples: AtomicU64,
    publish_errors: AtomicU64,
    unknown_variables: AtomicU64,
}

impl TelemetryPipeline {
    pub fn new(
        variables: &[VariableMapping],
        bus: Arc<dyn BusAdapter>,
        channel: u16,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let (pose, _) = watch::channel(Pose::default());

        Self {
            decoder: Mutex::new(TelemetryDecoder::new(variables)),
            bus,
            channel,
            shutdown,
            pose,
            samples: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
            unknown_variables: AtomicU64::new(0),
        }
    }

    /// Callback to hand to the link's telemetry stream.
    ///
    /// See [`VehicleLink::create_telemetry_stream`](crate::link::VehicleLink).
    pub fn callback(self: &Arc<Self>) -> TelemetryCallback {
        let pipeline = Arc::clone(self);
        Box::new(move |table: &VariableTable, period: Duration| {
            pipeline.on_sample(table, period)
        })
    }

    /// Receiver tracking the last known pose.
    pub fn subscribe_pose(&self) -> watch::Receiver<Pose> {
        self.pose.subscribe()
    }

    /// Last known pose.
    pub fn pose(&self) -> Pose {
        *self.pose.borrow()
    }

    /// Samples decoded and handed to the bus.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn publish_errors(&self) -> u64 {
        self.publish_errors.load(Ordering::Relaxed)
    }

    /// Received variables without a mapping, counted per sample.
    pub fn unknown_variables(&self) -> u64 {
        self.unknown_variables.load(Ordering::Relaxed)
    }

    /// Handle one sample. Returns `false` once the stream must stop.
    fn on_sample(&self, table: &VariableTable, period: Duration) -> bool {
        if !self.shutdown.observe_from_callback() {
            return false;
        }

        let timestamp = chrono::Utc::now().timestamp_millis();
        let (sample, warnings) = self.decoder.lock().decode(table, timestamp);
        if !warnings.is_empty() {
            self.unknown_variables
                .fetch_add(warnings.len() as u64, Ordering::Relaxed);
        }

        self.pose.send_modify(|pose| pose.update(&sample));
        self.samples.fetch_add(1, Ordering::Relaxed);

        for message in sample.messages() {
            if let Err(e) = self.bus.publish(message, timestamp, self.channel) {
                self.publish_errors.fetch_add(1, Ordering::Relaxed);
                warn!(kind = message.kind(), error = %e, "Failed to publish telemetry");
            }
        }

        trace!(
            timestamp,
            period_ms = period.as_millis() as u64,
            "Telemetry sample published"
        );
        true
    }
}
