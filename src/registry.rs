// Process-wide session table: at most one live session per robot
//
// The table starts empty and is only ever mutated through create/close (plus
// reclamation of entries a fatal transport error already closed). Create is
// two-phase so the lock is never held across the async channel open: the
// robot is reserved first, then the channel is opened, then the entry lands.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::channel::ChannelFactory;
use crate::config::TeleopConfig;
use crate::dispatcher::SessionHandle;
use crate::error::{Result, TeleopError};
use crate::session::{RobotIdentity, SessionId, SessionMeta, SessionState};

#[derive(Default)]
struct RegistryInner {
    by_robot: HashMap<RobotIdentity, Arc<SessionHandle>>,
    by_id: HashMap<SessionId, RobotIdentity>,
    // Robots with a create in flight (channel opening, no entry yet)
    pending: HashSet<RobotIdentity>,
}

/// Owner of all live sessions in the process
pub struct SessionRegistry {
    config: TeleopConfig,
    factory: Arc<dyn ChannelFactory>,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: TeleopConfig, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            config,
            factory,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Table mutations can't panic while holding the guard, but don't
        // let a poisoned lock wedge every robot
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a session for `robot`.
    ///
    /// Fails with `SessionConflict` while the robot has a live (or opening)
    /// session; two concurrent creates for one robot cannot both succeed.
    pub async fn create(&self, robot: RobotIdentity) -> Result<Arc<SessionHandle>> {
        // Phase 1: reserve the robot under the lock
        {
            let mut inner = self.lock();
            if inner.pending.contains(&robot) {
                return Err(TeleopError::SessionConflict { robot });
            }
            if let Some(existing) = inner.by_robot.get(&robot) {
                if existing.meta().is_live() {
                    return Err(TeleopError::SessionConflict { robot });
                }
                // Entry closed by a fatal transport error: reclaim it
                let stale_id = existing.meta().id();
                warn!(robot = %robot, session = %stale_id, "reclaiming closed session entry");
                inner.by_robot.remove(&robot);
                inner.by_id.remove(&stale_id);
            }
            inner.pending.insert(robot);
        }

        // Phase 2: open the channel without holding the lock
        let endpoint = self.config.endpoint(robot);
        info!(robot = %robot, endpoint = %endpoint, "starting teleop session");
        let opened = self.factory.open(&endpoint).await;

        let mut inner = self.lock();
        inner.pending.remove(&robot);
        let channel = opened.map_err(|source| TeleopError::Transport {
            attempts: 1,
            source,
        })?;

        let id = SessionId::next();
        let meta = Arc::new(SessionMeta::new(id, robot));
        let handle = Arc::new(SessionHandle::spawn(
            meta,
            channel,
            self.factory.clone(),
            endpoint,
        ));
        inner.by_robot.insert(robot, handle.clone());
        inner.by_id.insert(id, robot);
        info!(robot = %robot, session = %id, "session started");
        Ok(handle)
    }

    /// Look up a live session; closed sessions are gone as far as callers
    /// are concerned. An entry a fatal transport error already closed is
    /// dropped from the table on sight, which also lets its worker stop.
    pub fn get(&self, session_id: SessionId) -> Result<Arc<SessionHandle>> {
        let mut inner = self.lock();
        let handle = inner
            .by_id
            .get(&session_id)
            .and_then(|robot| inner.by_robot.get(robot))
            .filter(|handle| handle.meta().id() == session_id)
            .cloned();
        match handle {
            Some(handle) if handle.meta().is_live() => Ok(handle),
            Some(dead) => {
                let robot = dead.meta().robot();
                warn!(robot = %robot, session = %session_id, "pruning closed session entry");
                inner.by_id.remove(&session_id);
                let same = inner
                    .by_robot
                    .get(&robot)
                    .is_some_and(|h| h.meta().id() == session_id);
                if same {
                    inner.by_robot.remove(&robot);
                }
                Err(TeleopError::SessionNotFound { session_id })
            }
            None => Err(TeleopError::SessionNotFound { session_id }),
        }
    }

    /// Close a session: waits for any in-flight command, releases the channel
    /// (best-effort), removes the entry
    pub async fn close(&self, session_id: SessionId) -> Result<()> {
        let handle = self.get(session_id)?;
        handle.close().await;

        let mut inner = self.lock();
        if let Some(robot) = inner.by_id.remove(&session_id) {
            // Only drop the robot slot if it still points at this session
            let same = inner
                .by_robot
                .get(&robot)
                .is_some_and(|h| h.meta().id() == session_id);
            if same {
                inner.by_robot.remove(&robot);
            }
            info!(robot = %robot, session = %session_id, "session ended");
        }
        Ok(())
    }

    /// Current state of a session still known to the table, closed included
    pub fn session_status(&self, session_id: SessionId) -> Result<SessionState> {
        let inner = self.lock();
        inner
            .by_id
            .get(&session_id)
            .and_then(|robot| inner.by_robot.get(robot))
            .filter(|handle| handle.meta().id() == session_id)
            .map(|handle| handle.meta().state())
            .ok_or(TeleopError::SessionNotFound { session_id })
    }

    /// All live (active or degraded) sessions; entries closed by fatal
    /// transport errors are pruned along the way
    pub fn active_sessions(&self) -> Vec<(SessionId, RobotIdentity)> {
        let mut inner = self.lock();
        let dead: Vec<(RobotIdentity, SessionId)> = inner
            .by_robot
            .iter()
            .filter(|(_, handle)| !handle.meta().is_live())
            .map(|(robot, handle)| (*robot, handle.meta().id()))
            .collect();
        for (robot, session_id) in dead {
            inner.by_robot.remove(&robot);
            inner.by_id.remove(&session_id);
        }
        inner
            .by_robot
            .values()
            .map(|handle| (handle.meta().id(), handle.meta().robot()))
            .collect()
    }
}
