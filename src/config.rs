// Speed bounds, retry budget, and robot endpoint resolution

use std::time::Duration;

use crate::channel::RobotEndpoint;
use crate::session::RobotIdentity;

// Speed scale exposed by the robot-side teleop console
pub const SPEED_MIN: i32 = 1;
pub const SPEED_MAX: i32 = 7;
pub const SPEED_DEFAULT: i32 = 5;
pub const SPEED_STEP: i32 = 1;

/// Retries after the initial send attempt before a command gives up
pub const MAX_RETRIES: u32 = 3;

/// First retry delay; doubles per attempt up to `RETRY_CAP`
pub const RETRY_BASE: Duration = Duration::from_millis(100);
pub const RETRY_CAP: Duration = Duration::from_secs(2);

// Robot hosts sit at "{host_base}.{index + HOST_OFFSET}"; widened so the
// add cannot overflow for any u16 index
const HOST_OFFSET: u32 = 100;

/// Deterministic backoff for retry `attempt` (0-based): `RETRY_BASE * 2^attempt`, capped
pub fn retry_backoff(attempt: u32) -> Duration {
    RETRY_BASE
        .saturating_mul(1u32 << attempt.min(31))
        .min(RETRY_CAP)
}

/// Where the robot fleet lives on the network.
///
/// Loading this from the environment is the caller's concern; the engine only
/// needs the host base and the control port to resolve a robot index into a
/// connectable endpoint.
#[derive(Debug, Clone)]
pub struct TeleopConfig {
    pub host_base: String,
    pub control_port: u16,
}

impl TeleopConfig {
    pub fn new(host_base: impl Into<String>, control_port: u16) -> Self {
        Self {
            host_base: host_base.into(),
            control_port,
        }
    }

    /// Resolve a robot identity into the endpoint its control process listens on
    pub fn endpoint(&self, robot: RobotIdentity) -> RobotEndpoint {
        RobotEndpoint {
            host: format!("{}.{}", self.host_base, u32::from(robot.index()) + HOST_OFFSET),
            port: self.control_port,
        }
    }
}
