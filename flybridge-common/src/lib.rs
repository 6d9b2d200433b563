//! Flybridge Common Library
//!
//! Shared building blocks for the Crazyflie ⇄ Zenoh bridge:
//!
//! - [`messages`] - Wire types published to and consumed from the bus
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format) and the [`BridgeConfig`] trait
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expression builders
//! - [`status`] - Bridge status reports
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod messages;
pub mod serialization;
pub mod session;
pub mod status;

// Re-export commonly used types at the crate root
pub use config::{
    BridgeConfig, LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config,
};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder};
pub use messages::{
    BusMessage, CommandEnvelope, CommandPayload, Frame, TelemetryEnvelope, VehicleState,
    current_timestamp_millis,
};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;
pub use status::BridgeStatus;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Text output omits the event
/// target.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Config(format!("invalid log level '{}': {}", config.level, e)))?,
    };

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_target(false)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(false))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing already initialized: {}", e)))
}
