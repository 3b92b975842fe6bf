// Session identity and lifecycle state
//
// State machine: Active -> Degraded -> Active (recovered) or Closed.
// Closed is terminal; nothing transitions out of it.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Index of a robot under the configured host base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RobotIdentity(u16);

impl RobotIdentity {
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    pub fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Display for RobotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bot-{}", self.0)
    }
}

/// Process-unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id (monotonic within the process)
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Channel healthy, accepting commands
    Active,
    /// Transport failure observed, recovery in progress
    Degraded,
    /// Terminal: channel released, registry entry reclaimable
    Closed,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Active,
            1 => SessionState::Degraded,
            _ => SessionState::Closed,
        }
    }
}

/// Shared lifecycle view of one session.
///
/// The dispatch worker owns all mutable session state (channel, speed); this
/// is the part the registry and idle-policy collaborators may read without
/// going through the command queue.
#[derive(Debug)]
pub struct SessionMeta {
    id: SessionId,
    robot: RobotIdentity,
    created_at: Instant,
    state: AtomicU8,
    // Millis since created_at of the last successful dispatch
    last_activity_ms: AtomicU64,
}

impl SessionMeta {
    pub(crate) fn new(id: SessionId, robot: RobotIdentity) -> Self {
        Self {
            id,
            robot,
            created_at: Instant::now(),
            state: AtomicU8::new(SessionState::Active as u8),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn robot(&self) -> RobotIdentity {
        self.robot
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Active or Degraded: the session still owns its robot
    pub fn is_live(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// Move to `next`, refusing to leave Closed; returns false if already closed
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if SessionState::from_u8(current) == SessionState::Closed {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Timestamp of the last successful dispatch (creation time if none yet)
    pub fn last_activity_at(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire))
    }

    /// Record a successful dispatch now
    pub(crate) fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::AcqRel);
    }
}
