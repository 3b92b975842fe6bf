// Command intents and the pure translator to teleop-console key frames
//
// The robot-side console reads raw keystrokes: arrow escape sequences for
// movement, '<' / '>' for rotation, '+' / '-' for the speed scale. Movement
// and rotation keys are repeated so a single API call produces a perceptible
// motion.

use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TeleopError;

/// Keystroke repeat count for move/rotate frames
pub const KEY_REPEAT: usize = 5;

// Arrow keys in application cursor mode, as the console expects them
const KEY_UP: &[u8] = b"\x1bOA";
const KEY_DOWN: &[u8] = b"\x1bOB";
const KEY_RIGHT: &[u8] = b"\x1bOC";
const KEY_LEFT: &[u8] = b"\x1bOD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
    Left,
    Right,
}

impl MoveDirection {
    fn key(self) -> &'static [u8] {
        match self {
            MoveDirection::Up => KEY_UP,
            MoveDirection::Down => KEY_DOWN,
            MoveDirection::Left => KEY_LEFT,
            MoveDirection::Right => KEY_RIGHT,
        }
    }
}

impl FromStr for MoveDirection {
    type Err = TeleopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            "left" => Ok(MoveDirection::Left),
            "right" => Ok(MoveDirection::Right),
            other => Err(TeleopError::InvalidCommand {
                what: "move direction",
                value: other.to_string(),
                valid: "up, down, left, right",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateDirection {
    Left,
    Right,
}

impl RotateDirection {
    fn key(self) -> u8 {
        match self {
            RotateDirection::Left => b'<',
            RotateDirection::Right => b'>',
        }
    }
}

impl FromStr for RotateDirection {
    type Err = TeleopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(RotateDirection::Left),
            "right" => Ok(RotateDirection::Right),
            other => Err(TeleopError::InvalidCommand {
                what: "rotation direction",
                value: other.to_string(),
                valid: "left, right",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedAction {
    Increase,
    Decrease,
}

impl SpeedAction {
    fn key(self) -> u8 {
        match self {
            SpeedAction::Increase => b'+',
            SpeedAction::Decrease => b'-',
        }
    }
}

impl FromStr for SpeedAction {
    type Err = TeleopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increase" => Ok(SpeedAction::Increase),
            "decrease" => Ok(SpeedAction::Decrease),
            other => Err(TeleopError::InvalidCommand {
                what: "speed action",
                value: other.to_string(),
                valid: "increase, decrease",
            }),
        }
    }
}

/// Discrete control intent for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Move(MoveDirection),
    Rotate(RotateDirection),
    SpeedChange(SpeedAction),
    QuerySpeed,
}

/// One immutable command record, consumed exactly once by the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub kind: CommandKind,
    pub submitted_at: Instant,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            submitted_at: Instant::now(),
        }
    }
}

/// Translate a command into the wire frame the console expects.
///
/// Pure mapping: no channel I/O, no state. `current_speed` is the session's
/// speed at translation time; the console applies its own mirrored speed
/// state to movement, so move/rotate frames carry direction keys only.
/// Returns `None` for commands that need no channel I/O (QUERY_SPEED).
pub fn translate(kind: &CommandKind, current_speed: i32) -> Option<Vec<u8>> {
    debug!(?kind, current_speed, "translating command");
    match kind {
        CommandKind::Move(direction) => Some(direction.key().repeat(KEY_REPEAT)),
        CommandKind::Rotate(direction) => Some(vec![direction.key(); KEY_REPEAT]),
        CommandKind::SpeedChange(action) => Some(vec![action.key()]),
        CommandKind::QuerySpeed => None,
    }
}
