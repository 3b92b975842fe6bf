// Operation facade: what the HTTP layer calls into
//
// Takes the raw direction/action strings from requests, validates them before
// touching any session state, and shapes responses the way the API exposes
// them. All robot I/O goes through the registry and each session's
// dispatcher; nothing here touches a channel directly.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::channel::ChannelFactory;
use crate::command::{Command, CommandKind, MoveDirection, RotateDirection, SpeedAction};
use crate::config::TeleopConfig;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::session::{RobotIdentity, SessionId, SessionState};

#[derive(Debug, Serialize)]
pub struct SessionStarted {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub status: &'static str,
}

impl OperationResponse {
    fn success() -> Self {
        Self { status: "success" }
    }
}

#[derive(Debug, Serialize)]
pub struct SpeedResponse {
    pub speed: i32,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_status: SessionState,
}

#[derive(Debug, Serialize)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub robot: RobotIdentity,
}

/// Teleoperation service over a fleet of robots
pub struct TeleopService {
    registry: SessionRegistry,
}

impl TeleopService {
    pub fn new(config: TeleopConfig, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            registry: SessionRegistry::new(config, factory),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn start_session(&self, robot: RobotIdentity) -> Result<SessionStarted> {
        let handle = self.registry.create(robot).await?;
        Ok(SessionStarted {
            session_id: handle.meta().id(),
        })
    }

    pub async fn end_session(&self, session_id: SessionId) -> Result<OperationResponse> {
        self.registry.close(session_id).await?;
        Ok(OperationResponse::success())
    }

    pub async fn move_robot(
        &self,
        session_id: SessionId,
        direction: &str,
    ) -> Result<OperationResponse> {
        // Validate before resolving the session: bad input has no side effects
        let direction: MoveDirection = direction.parse()?;
        info!(session = %session_id, ?direction, "move");
        let handle = self.registry.get(session_id)?;
        handle
            .submit(Command::new(CommandKind::Move(direction)))
            .await?;
        Ok(OperationResponse::success())
    }

    pub async fn rotate(
        &self,
        session_id: SessionId,
        direction: &str,
    ) -> Result<OperationResponse> {
        let direction: RotateDirection = direction.parse()?;
        info!(session = %session_id, ?direction, "rotate");
        let handle = self.registry.get(session_id)?;
        handle
            .submit(Command::new(CommandKind::Rotate(direction)))
            .await?;
        Ok(OperationResponse::success())
    }

    pub async fn change_speed(
        &self,
        session_id: SessionId,
        action: &str,
    ) -> Result<SpeedResponse> {
        let action: SpeedAction = action.parse()?;
        info!(session = %session_id, ?action, "speed change");
        let handle = self.registry.get(session_id)?;
        let outcome = handle
            .submit(Command::new(CommandKind::SpeedChange(action)))
            .await?;
        Ok(SpeedResponse {
            speed: outcome.speed,
        })
    }

    /// Current speed, read through the session's command queue so the answer
    /// can never run ahead of a queued speed change
    pub async fn get_speed(&self, session_id: SessionId) -> Result<SpeedResponse> {
        let handle = self.registry.get(session_id)?;
        let outcome = handle.submit(Command::new(CommandKind::QuerySpeed)).await?;
        Ok(SpeedResponse {
            speed: outcome.speed,
        })
    }

    pub fn session_status(&self, session_id: SessionId) -> Result<SessionStatusResponse> {
        Ok(SessionStatusResponse {
            session_status: self.registry.session_status(session_id)?,
        })
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        self.registry
            .active_sessions()
            .into_iter()
            .map(|(session_id, robot)| ActiveSession { session_id, robot })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_json_shapes() {
        let speed = serde_json::to_value(SpeedResponse { speed: 5 }).unwrap();
        assert_eq!(speed, serde_json::json!({"speed": 5}));

        let op = serde_json::to_value(OperationResponse::success()).unwrap();
        assert_eq!(op, serde_json::json!({"status": "success"}));

        let status = serde_json::to_value(SessionStatusResponse {
            session_status: SessionState::Degraded,
        })
        .unwrap();
        assert_eq!(status, serde_json::json!({"session_status": "degraded"}));
    }
}
