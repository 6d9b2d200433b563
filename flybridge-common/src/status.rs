//! Bridge status reporting.

use serde::{Deserialize, Serialize};

/// Bridge status published on `<prefix>/@/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "crazyflie").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata (vehicle URI, channel, policies).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_status(bridge: String, version: String, status: &str) -> Self {
        Self {
            bridge,
            version,
            status: status.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge.into(), version.into(), "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_status(bridge.into(), version.into(), "offline")
    }

    /// Create a status with "error" state.
    pub fn error(
        bridge: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::with_status(bridge.into(), version.into(), "error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("crazyflie", "0.1.0");
        assert_eq!(status.bridge, "crazyflie");
        assert_eq!(status.status, "running");
    }

    #[test]
    fn test_status_serialization_flattens_metadata() {
        let status = BridgeStatus::running("crazyflie", "1.0.0").with_metadata(serde_json::json!({
            "uri": "sim://cf1",
            "channel": 2
        }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"bridge\":\"crazyflie\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"uri\":\"sim://cf1\""));
        assert!(json.contains("\"channel\":2"));
    }

    #[test]
    fn test_status_error_carries_message() {
        let status = BridgeStatus::error("crazyflie", "1.0.0", "link lost");
        assert_eq!(status.status, "error");
        assert_eq!(status.metadata["error"], "link lost");
    }
}
