//! Zenoh bridge for Crazyflie micro-aerial vehicles.
//!
//! The bridge streams telemetry from the vehicle to Zenoh and relays commands
//! published on Zenoh to the vehicle.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/<channel>/frame        position and attitude (radians)
//! <prefix>/<channel>/state        battery voltage and heading
//! <prefix>/<channel>/@/commands   inbound commands
//! <prefix>/@/status               bridge status
//! ```
//!
//! Where:
//! - `<prefix>` - Key prefix from configuration (default `flybridge/crazyflie`)
//! - `<channel>` - Channel (frame id) identifying the vehicle
//!
//! # Architecture
//!
//! Three tasks cooperate:
//! - the link's telemetry task runs the [`telemetry`] callback, which decodes
//!   each sample and hands it to the [`bus`];
//! - the bus subscriber stages commands in the [`inbox`];
//! - the [`dispatch`] loop owns the [`session`], heart-beats the vehicle and
//!   sends the latest staged command.
//!
//! [`shutdown`] coordinates stopping across all three, and [`bridge`] wires
//! them together behind `start` / `request_stop`.

pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod inbox;
pub mod link;
pub mod session;
pub mod shutdown;
pub mod sim;
pub mod stats;
pub mod telemetry;

pub use bridge::Bridge;
pub use bus::{BusAdapter, CommandHandler, CommandSubscription, ZenohBus};
pub use command::{Command, GoToPolicy, Pose};
pub use config::CrazyflieBridgeConfig;
pub use error::{BridgeError, BusError, LinkFailure, Result, SessionError};
pub use inbox::{CommandInbox, StageOutcome};
pub use session::SessionState;
pub use shutdown::ShutdownCoordinator;
pub use stats::BridgeStats;
