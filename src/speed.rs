// Bounded speed state for one session
//
// The robot console keeps its own speed scale; this controller mirrors it so
// the engine can answer speed queries without a round trip. Mutations happen
// only inside the session's dispatch worker, never concurrently.

use crate::command::SpeedAction;
use crate::config::{SPEED_DEFAULT, SPEED_MAX, SPEED_MIN, SPEED_STEP};

/// Speed bounds and step size.
///
/// Fixed crate-wide defaults for now; per-robot-model limits would plug in
/// through this value object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedLimits {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            min: SPEED_MIN,
            max: SPEED_MAX,
            step: SPEED_STEP,
        }
    }
}

/// Current speed value for a session, clamped to its limits
#[derive(Debug)]
pub struct SpeedController {
    value: i32,
    limits: SpeedLimits,
}

impl SpeedController {
    pub fn new() -> Self {
        Self::with_limits(SpeedLimits::default())
    }

    pub fn with_limits(limits: SpeedLimits) -> Self {
        Self {
            value: SPEED_DEFAULT.clamp(limits.min, limits.max),
            limits,
        }
    }

    pub fn get(&self) -> i32 {
        self.value
    }

    /// Step up, clamping at the upper bound; returns the new value
    pub fn increase(&mut self) -> i32 {
        self.value = (self.value + self.limits.step).min(self.limits.max);
        self.value
    }

    /// Step down, clamping at the lower bound; returns the new value
    pub fn decrease(&mut self) -> i32 {
        self.value = (self.value - self.limits.step).max(self.limits.min);
        self.value
    }

    pub fn apply(&mut self, action: SpeedAction) -> i32 {
        match action {
            SpeedAction::Increase => self.increase(),
            SpeedAction::Decrease => self.decrease(),
        }
    }
}

impl Default for SpeedController {
    fn default() -> Self {
        Self::new()
    }
}
