//! Configuration for the Crazyflie bridge.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flybridge_common::config::{BridgeConfig, LoggingConfig, ZenohConfig};
use flybridge_common::{Error, Format, KEY_PREFIX, Result};

use crate::command::GoToPolicy;
use crate::decoder::{VariableMapping, default_variables};
use crate::link::LinkUri;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrazyflieBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Vehicle settings
    pub crazyflie: CrazyflieConfig,

    /// Bus key expressions and encoding
    #[serde(default)]
    pub bus: BusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vehicle link and control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrazyflieConfig {
    /// Link URI, e.g. "radio://0/80/2M/E7E7E7E7E7" or "sim://cf1"
    pub uri: LinkUri,

    /// How GoTo targets are interpreted. No default: it must be chosen.
    pub goto_policy: GoToPolicy,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Dispatch loop cadence in milliseconds
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    #[serde(default)]
    pub close: CloseConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Upper bound on waiting for the telemetry stream to drain on stop
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_dispatch_interval_ms() -> u64 {
    5
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

impl CrazyflieConfig {
    /// Settings for `uri` with every other field at its default.
    pub fn new(uri: LinkUri, goto_policy: GoToPolicy) -> Self {
        Self {
            uri,
            goto_policy,
            telemetry: TelemetryConfig::default(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            close: CloseConfig::default(),
            reconnect: ReconnectConfig::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Telemetry stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Sample period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Variables to stream and the sample field each one fills
    #[serde(default = "default_variables")]
    pub variables: Vec<VariableMapping>,
}

fn default_period_ms() -> u64 {
    100
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            variables: default_variables(),
        }
    }
}

impl TelemetryConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Landing sequence run when the session closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseConfig {
    /// Duration of the Land manoeuvre
    #[serde(default = "default_land_duration_ms")]
    pub land_duration_ms: u64,

    /// Wait after Land before Stop
    #[serde(default = "default_land_settle_ms")]
    pub land_settle_ms: u64,

    /// Wait after Stop before releasing the link
    #[serde(default = "default_stop_settle_ms")]
    pub stop_settle_ms: u64,
}

fn default_land_duration_ms() -> u64 {
    2000
}

fn default_land_settle_ms() -> u64 {
    2250
}

fn default_stop_settle_ms() -> u64 {
    500
}

impl Default for CloseConfig {
    fn default() -> Self {
        Self {
            land_duration_ms: default_land_duration_ms(),
            land_settle_ms: default_land_settle_ms(),
            stop_settle_ms: default_stop_settle_ms(),
        }
    }
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Backoff after the first failed attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Consecutive failed attempts before giving up (unlimited if unset)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Zero before the first failure, then doubling from
    /// `initial_backoff_ms` up to `max_backoff_ms`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(failures - 1).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Key expression prefix (default: "flybridge/crazyflie")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Channel (frame id) of this vehicle
    #[serde(default)]
    pub channel: u16,

    /// Payload encoding for telemetry
    #[serde(default)]
    pub serialization: Format,

    /// Encoded telemetry messages waiting for Zenoh; further ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            channel: 0,
            serialization: Format::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BridgeConfig for CrazyflieBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.bus.key_prefix
    }

    fn validate(&self) -> Result<()> {
        let cf = &self.crazyflie;

        if cf.telemetry.period_ms == 0 {
            return Err(Error::validation("crazyflie.telemetry.period_ms must be > 0"));
        }
        if cf.drain_timeout_ms <= cf.telemetry.period_ms {
            return Err(Error::validation(format!(
                "crazyflie.drain_timeout_ms ({}) must exceed telemetry.period_ms ({})",
                cf.drain_timeout_ms, cf.telemetry.period_ms
            )));
        }
        if cf.dispatch_interval_ms == 0 {
            return Err(Error::validation("crazyflie.dispatch_interval_ms must be > 0"));
        }
        if cf.telemetry.variables.is_empty() {
            return Err(Error::validation(
                "crazyflie.telemetry.variables must not be empty",
            ));
        }

        let mut seen = HashSet::new();
        for variable in &cf.telemetry.variables {
            if variable.group.is_empty() || variable.name.is_empty() {
                return Err(Error::validation(
                    "Telemetry variables need both a group and a name",
                ));
            }
            if !seen.insert(variable.item()) {
                return Err(Error::validation(format!(
                    "Telemetry variable '{}' is listed more than once",
                    variable.item()
                )));
            }
        }

        let reconnect = &cf.reconnect;
        if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
            return Err(Error::validation(format!(
                "crazyflie.reconnect.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                reconnect.initial_backoff_ms, reconnect.max_backoff_ms
            )));
        }
        if reconnect.max_attempts == Some(0) {
            return Err(Error::validation(
                "crazyflie.reconnect.max_attempts must be at least 1 when set",
            ));
        }

        if self.bus.queue_capacity == 0 {
            return Err(Error::validation("bus.queue_capacity must be > 0"));
        }

        let prefix = self.bus.key_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return Err(Error::validation("bus.key_prefix must not be empty"));
        }
        if prefix.contains(['*', '$', '?', '#']) {
            return Err(Error::validation(format!(
                "bus.key_prefix '{}' must not contain wildcards",
                prefix
            )));
        }

        Ok(())
    }
}
