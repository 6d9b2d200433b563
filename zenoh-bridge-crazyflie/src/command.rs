//! Vehicle commands and their translation to control packets.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flybridge_common::CommandEnvelope;

use crate::decoder::TelemetrySample;
use crate::error::CommandError;
use crate::link::ControlPacket;

/// Sender stamps carried by [`CommandEnvelope`].
pub const STAMP_TAKEOFF: u32 = 0;
pub const STAMP_LAND: u32 = 1;
pub const STAMP_STOP: u32 = 2;
pub const STAMP_GOTO: u32 = 3;
pub const STAMP_HOVER: u32 = 4;

/// A command relayed from the bus to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Takeoff {
        height: f32,
        duration: Duration,
    },
    Land {
        height: f32,
        duration: Duration,
    },
    Stop,
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

impl Command {
    /// Build a command from a bus envelope.
    pub fn from_envelope(envelope: &CommandEnvelope) -> Result<Self, CommandError> {
        let p = &envelope.payload;

        let command = match envelope.sender_stamp {
            STAMP_TAKEOFF => Command::Takeoff {
                height: p.height,
                duration: seconds(p.time)?,
            },
            STAMP_LAND => Command::Land {
                height: p.height,
                duration: seconds(p.time)?,
            },
            STAMP_STOP => Command::Stop,
            STAMP_GOTO => Command::GoTo {
                x: p.x,
                y: p.y,
                z: p.z,
                yaw: p.yaw,
                duration: seconds(p.time)?,
            },
            STAMP_HOVER => Command::Hover {
                vx: p.vx,
                vy: p.vy,
                yaw_rate: p.yaw_rate,
                z: p.z,
            },
            other => return Err(CommandError::UnknownSender(other)),
        };

        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Takeoff { .. } => "takeoff",
            Command::Land { .. } => "land",
            Command::Stop => "stop",
            Command::GoTo { .. } => "goto",
            Command::Hover { .. } => "hover",
        }
    }

    /// Translate into the vehicle's control packet.
    ///
    /// Only `GoTo` depends on `policy`; under [`GoToPolicy::Relative`] the
    /// target is offset by `pose`.
    pub fn to_packet(&self, policy: GoToPolicy, pose: &Pose) -> ControlPacket {
        match *self {
            Command::Takeoff { height, duration } => ControlPacket::Takeoff { height, duration },
            Command::Land { height, duration } => ControlPacket::Land { height, duration },
            Command::Stop => ControlPacket::Stop,
            Command::GoTo {
                x,
                y,
                z,
                yaw,
                duration,
            } => match policy {
                GoToPolicy::Absolute => ControlPacket::GoTo {
                    x,
                    y,
                    z,
                    yaw,
                    duration,
                },
                GoToPolicy::Relative => ControlPacket::GoTo {
                    x: (pose.x + x as f64) as f32,
                    y: (pose.y + y as f64) as f32,
                    z: (pose.z + z as f64) as f32,
                    yaw: (pose.yaw + yaw as f64) as f32,
                    duration,
                },
            },
            Command::Hover {
                vx,
                vy,
                yaw_rate,
                z,
            } => ControlPacket::Hover {
                vx,
                vy,
                yaw_rate,
                z,
            },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn seconds(secs: f32) -> Result<Duration, CommandError> {
    Duration::try_from_secs_f32(secs).map_err(|_| CommandError::InvalidDuration(secs))
}

/// How GoTo targets are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoToPolicy {
    /// Targets are world coordinates.
    Absolute,
    /// Targets are offsets from the last known pose.
    Relative,
}

impl fmt::Display for GoToPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoToPolicy::Absolute => f.write_str("absolute"),
            GoToPolicy::Relative => f.write_str("relative"),
        }
    }
}

/// Last known position (metres) and heading (radians).
///
/// Starts at the origin until the first sample arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

impl Pose {
    /// Fold in the fields present in `sample`; absent ones keep their value.
    pub fn update(&mut self, sample: &TelemetrySample) {
        if let Some(x) = sample.x {
            self.x = x;
        }
        if let Some(y) = sample.y {
            self.y = y;
        }
        if let Some(z) = sample.z {
            self.z = z;
        }
        if let Some(yaw) = sample.yaw {
            self.yaw = yaw;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flybridge_common::CommandPayload;

    fn envelope(stamp: u32, payload: CommandPayload) -> CommandEnvelope {
        CommandEnvelope {
            sender_stamp: stamp,
            timestamp: 0,
            payload,
        }
    }

    #[test]
    fn test_stamps_map_to_variants() {
        let payload = CommandPayload {
            height: 0.5,
            time: 2.0,
            x: 1.0,
            y: 2.0,
            z: 3.0,
            yaw: 0.25,
            vx: 0.1,
            vy: 0.2,
            yaw_rate: 0.3,
        };

        assert_eq!(
            Command::from_envelope(&envelope(0, payload)).unwrap(),
            Command::Takeoff {
                height: 0.5,
                duration: Duration::from_secs(2)
            }
        );
        assert_eq!(
            Command::from_envelope(&envelope(1, payload)).unwrap(),
            Command::Land {
                height: 0.5,
                duration: Duration::from_secs(2)
            }
        );
        assert_eq!(
            Command::from_envelope(&envelope(2, payload)).unwrap(),
            Command::Stop
        );
        assert_eq!(
            Command::from_envelope(&envelope(3, payload)).unwrap(),
            Command::GoTo {
                x: 1.0,
                y: 2.0,
                z: 3.0,
                yaw: 0.25,
                duration: Duration::from_secs(2)
            }
        );
        assert_eq!(
            Command::from_envelope(&envelope(4, payload)).unwrap(),
            Command::Hover {
                vx: 0.1,
                vy: 0.2,
                yaw_rate: 0.3,
                z: 3.0
            }
        );
    }

    #[test]
    fn test_unknown_stamp_is_rejected() {
        let err = Command::from_envelope(&envelope(9, CommandPayload::default())).unwrap_err();
        assert_eq!(err, CommandError::UnknownSender(9));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let payload = CommandPayload {
            time: -1.0,
            ..Default::default()
        };
        let err = Command::from_envelope(&envelope(STAMP_TAKEOFF, payload)).unwrap_err();
        assert_eq!(err, CommandError::InvalidDuration(-1.0));
    }

    #[test]
    fn test_goto_absolute_ignores_pose() {
        let goto = Command::GoTo {
            x: 1.0,
            y: 0.0,
            z: 1.0,
            yaw: 0.0,
            duration: Duration::from_secs(2),
        };
        let pose = Pose {
            x: 0.5,
            y: 0.5,
            z: 0.5,
            yaw: 0.3,
        };

        assert_eq!(
            goto.to_packet(GoToPolicy::Absolute, &pose),
            ControlPacket::GoTo {
                x: 1.0,
                y: 0.0,
                z: 1.0,
                yaw: 0.0,
                duration: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_goto_relative_offsets_from_pose() {
        let goto = Command::GoTo {
            x: 1.0,
            y: 0.0,
            z: 1.0,
            yaw: 0.0,
            duration: Duration::from_secs(2),
        };
        let pose = Pose {
            x: 0.5,
            y: 0.5,
            z: 0.5,
            yaw: 0.25,
        };

        assert_eq!(
            goto.to_packet(GoToPolicy::Relative, &pose),
            ControlPacket::GoTo {
                x: 1.5,
                y: 0.5,
                z: 1.5,
                yaw: 0.25,
                duration: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_other_commands_ignore_policy() {
        let pose = Pose {
            x: 3.0,
            ..Default::default()
        };
        let hover = Command::Hover {
            vx: 0.1,
            vy: 0.0,
            yaw_rate: 0.0,
            z: 0.4,
        };

        assert_eq!(
            hover.to_packet(GoToPolicy::Relative, &pose),
            hover.to_packet(GoToPolicy::Absolute, &pose)
        );
        assert_eq!(
            Command::Stop.to_packet(GoToPolicy::Relative, &pose),
            ControlPacket::Stop
        );
    }

    #[test]
    fn test_pose_keeps_missing_fields() {
        let mut pose = Pose {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            yaw: 0.5,
        };
        pose.update(&TelemetrySample {
            x: Some(4.0),
            yaw: Some(1.0),
            ..Default::default()
        });

        assert_eq!(
            pose,
            Pose {
                x: 4.0,
                y: 2.0,
                z: 3.0,
                yaw: 1.0
            }
        );
    }

    #[test]
    fn test_policy_serde() {
        let policy: GoToPolicy = serde_json::from_str("\"relative\"").unwrap();
        assert_eq!(policy, GoToPolicy::Relative);
        assert!(serde_json::from_str::<GoToPolicy>("\"drift\"").is_err());
    }
}
