// Session and command dispatch engine for WeMo robot teleoperation
//
// Remote clients drive a physical robot through short discrete commands
// (move, rotate, speed change); this crate owns the session lifecycle, the
// exclusive per-robot control channel, and ordered command dispatch with
// retry. The HTTP surface and the concrete remote-shell transport live
// outside this crate, behind the `Channel` / `ChannelFactory` seam.

pub mod channel;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod service;
pub mod session;
pub mod speed;

pub use channel::{Channel, ChannelError, ChannelFactory, RobotEndpoint};
pub use command::{Command, CommandKind, MoveDirection, RotateDirection, SpeedAction};
pub use config::TeleopConfig;
pub use dispatcher::{CommandOutcome, SessionHandle};
pub use error::{Result, TeleopError};
pub use registry::SessionRegistry;
pub use service::TeleopService;
pub use session::{RobotIdentity, SessionId, SessionState};
pub use speed::{SpeedController, SpeedLimits};
