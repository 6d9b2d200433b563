//! Error types for the bridge.
//!
//! [`LinkFailure`] is the expected kind: the radio dropped, a packet could not
//! be delivered. The dispatch loop recovers from it by reconnecting and it is
//! never surfaced to the bus. [`BridgeError`] is for everything that should
//! stop the bridge instead of being retried.

use thiserror::Error;

/// Transport-level failure on the vehicle link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkFailure {
    /// The connection handshake did not complete.
    #[error("handshake with {uri} failed: {reason}")]
    Handshake { uri: String, reason: String },

    /// A packet could not be sent or received.
    #[error("transport error: {0}")]
    Transport(String),

    /// No link is currently established.
    #[error("link is not connected")]
    NotConnected,
}

impl LinkFailure {
    /// Create a transport failure.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Errors from the vehicle session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Recoverable link failure.
    #[error(transparent)]
    Link(#[from] LinkFailure),

    /// The configured reconnect budget is spent.
    #[error("gave up reconnecting after {attempts} failed attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// A telemetry variable the decoder has no mapping for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown telemetry variable {group}.{name}")]
pub struct DecodeWarning {
    pub group: String,
    pub name: String,
}

/// Errors turning a bus envelope into a command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown command sender stamp {0}")]
    UnknownSender(u32),

    #[error("invalid duration {0}s")]
    InvalidDuration(f32),
}

/// A link URI that does not look like `<scheme>://<address>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid link URI '{0}': expected <scheme>://<address>")]
pub struct InvalidUri(pub String);

/// Errors from the bus adapter.
#[derive(Debug, Error)]
pub enum BusError {
    /// The adapter no longer accepts messages.
    #[error("bus adapter is closed")]
    Closed,

    /// The publish queue is full; the message was dropped.
    #[error("publish queue full, dropped message for {key}")]
    QueueFull { key: String },

    #[error("failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    #[error(transparent)]
    Common(#[from] flybridge_common::Error),
}

/// Unexpected errors that terminate the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] flybridge_common::Error),

    #[error("failed to connect to vehicle: {0}")]
    Startup(LinkFailure),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("dispatch task failed: {0}")]
    Dispatch(String),
}

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_converts_into_session_error() {
        let err: SessionError = LinkFailure::NotConnected.into();
        assert!(matches!(err, SessionError::Link(LinkFailure::NotConnected)));
        assert_eq!(err.to_string(), "link is not connected");
    }

    #[test]
    fn test_decode_warning_display() {
        let warning = DecodeWarning {
            group: "pm".to_string(),
            name: "chargeCurrent".to_string(),
        };
        assert_eq!(
            warning.to_string(),
            "unknown telemetry variable pm.chargeCurrent"
        );
    }
}
