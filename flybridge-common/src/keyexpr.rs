use crate::messages::BusMessage;

/// Default key expression prefix for the Crazyflie bridge.
pub const KEY_PREFIX: &str = "flybridge/crazyflie";

/// Builder for the bridge's key expressions.
///
/// Key expressions follow the pattern:
/// `<prefix>/<channel>/<kind>` for telemetry,
/// `<prefix>/<channel>/@/commands` for commands and
/// `<prefix>/@/status` for bridge status.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with a custom prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The prefix in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key expression for an outbound message on a channel.
    ///
    /// # Example
    /// ```
    /// use flybridge_common::keyexpr::KeyExprBuilder;
    /// use flybridge_common::messages::{BusMessage, Frame};
    ///
    /// let builder = KeyExprBuilder::new("flybridge/crazyflie");
    /// let key = builder.telemetry(3, &BusMessage::Frame(Frame::default()));
    /// assert_eq!(key, "flybridge/crazyflie/3/frame");
    /// ```
    pub fn telemetry(&self, channel: u16, message: &BusMessage) -> String {
        format!("{}/{}/{}", self.prefix, channel, message.kind())
    }

    /// Key expression on which commands for a channel are received.
    ///
    /// # Example
    /// ```
    /// use flybridge_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("flybridge/crazyflie");
    /// assert_eq!(builder.commands(3), "flybridge/crazyflie/3/@/commands");
    /// ```
    pub fn commands(&self, channel: u16) -> String {
        format!("{}/{}/@/commands", self.prefix, channel)
    }

    /// Wildcard covering all telemetry of a channel.
    pub fn channel_wildcard(&self, channel: u16) -> String {
        format!("{}/{}/*", self.prefix, channel)
    }

    /// Key expression for bridge status.
    pub fn status(&self) -> String {
        format!("{}/@/status", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Frame, VehicleState};

    #[test]
    fn test_key_builder() {
        let builder = KeyExprBuilder::default();

        assert_eq!(
            builder.telemetry(0, &BusMessage::VehicleState(VehicleState::default())),
            "flybridge/crazyflie/0/state"
        );
        assert_eq!(
            builder.telemetry(12, &BusMessage::Frame(Frame::default())),
            "flybridge/crazyflie/12/frame"
        );
        assert_eq!(builder.commands(0), "flybridge/crazyflie/0/@/commands");
        assert_eq!(builder.channel_wildcard(1), "flybridge/crazyflie/1/*");
        assert_eq!(builder.status(), "flybridge/crazyflie/@/status");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let builder = KeyExprBuilder::new("lab/uav/");
        assert_eq!(builder.prefix(), "lab/uav");
        assert_eq!(builder.status(), "lab/uav/@/status");
    }
}
