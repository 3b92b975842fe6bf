// Error taxonomy for the teleop engine
//
// Validation errors (SessionConflict, SessionNotFound, InvalidCommand) are
// raised synchronously before any side effect; Transport only after the retry
// budget is spent.

use crate::channel::ChannelError;
use crate::session::{RobotIdentity, SessionId};

pub type Result<T> = std::result::Result<T, TeleopError>;

#[derive(Debug, thiserror::Error)]
pub enum TeleopError {
    /// The robot already has a live (active or degraded) session
    #[error("robot {robot} already has an active session")]
    SessionConflict { robot: RobotIdentity },

    /// Unknown or closed session id
    #[error("no active session {session_id}")]
    SessionNotFound { session_id: SessionId },

    /// Unrecognized direction or action for a command kind
    #[error("invalid {what}: {value:?} (valid: {valid})")]
    InvalidCommand {
        what: &'static str,
        value: String,
        valid: &'static str,
    },

    /// Channel I/O failed and the retry budget is exhausted
    #[error("transport failed after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    /// Reserved for strict speed-bound policies; the current controller
    /// clamps at the bounds instead of raising this
    #[error("speed out of bounds")]
    SpeedBound,
}
