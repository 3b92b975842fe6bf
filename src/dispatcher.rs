// Per-session command dispatch: FIFO execution with bounded retry
//
// Every session gets one worker task that owns its transport channel. All
// commands funnel through the worker's queue, so for a given session no two
// commands are ever in flight at once and execution order equals submission
// order. Workers for different sessions run fully independently; a retry
// backoff on one robot never delays another.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, ChannelFactory, RobotEndpoint};
use crate::command::{Command, CommandKind, translate};
use crate::config::{MAX_RETRIES, retry_backoff};
use crate::error::{Result, TeleopError};
use crate::session::{SessionMeta, SessionState};
use crate::speed::SpeedController;

/// Result of one dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Session speed after the command ran
    pub speed: i32,
}

enum WorkerMsg {
    Dispatch(Command, oneshot::Sender<Result<CommandOutcome>>),
    Close(oneshot::Sender<()>),
}

/// Handle to a session's dispatch worker.
///
/// Cloneable view held by the registry; dropping all handles stops the worker
/// and releases the channel.
pub struct SessionHandle {
    meta: Arc<SessionMeta>,
    tx: mpsc::UnboundedSender<WorkerMsg>,
}

impl SessionHandle {
    /// Spawn a worker owning `channel` and return the handle feeding it
    pub(crate) fn spawn(
        meta: Arc<SessionMeta>,
        channel: Box<dyn Channel>,
        factory: Arc<dyn ChannelFactory>,
        endpoint: RobotEndpoint,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            meta: meta.clone(),
            speed: SpeedController::new(),
            channel: Some(channel),
            factory,
            endpoint,
        };
        tokio::spawn(worker.run(rx));
        Self { meta, tx }
    }

    pub fn meta(&self) -> &Arc<SessionMeta> {
        &self.meta
    }

    /// Enqueue a command and wait for its outcome.
    ///
    /// Commands are executed strictly in enqueue order. The returned future
    /// resolves only after every earlier command for this session has
    /// resolved (including their retries).
    pub async fn submit(&self, command: Command) -> Result<CommandOutcome> {
        let session_id = self.meta.id();
        let not_found = || TeleopError::SessionNotFound { session_id };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::Dispatch(command, reply_tx))
            .map_err(|_| not_found())?;
        reply_rx.await.map_err(|_| not_found())?
    }

    /// Ask the worker to shut down, waiting for any in-flight command to
    /// finish first. Idempotent: closing an already-stopped worker is a no-op.
    pub(crate) async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WorkerMsg::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct Worker {
    meta: Arc<SessionMeta>,
    speed: SpeedController,
    channel: Option<Box<dyn Channel>>,
    factory: Arc<dyn ChannelFactory>,
    endpoint: RobotEndpoint,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMsg::Dispatch(command, reply) => {
                    let result = if self.meta.is_live() {
                        self.execute(command).await
                    } else {
                        Err(TeleopError::SessionNotFound {
                            session_id: self.meta.id(),
                        })
                    };
                    // Caller may have gone away; the command is spent either way
                    let _ = reply.send(result);
                }
                WorkerMsg::Close(ack) => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }
        // Registry dropped us without an explicit close (or we broke out):
        // make sure the channel is not leaked.
        self.shutdown().await;
    }

    async fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        debug!(
            session = %self.meta.id(),
            kind = ?command.kind,
            queued_for = ?command.submitted_at.elapsed(),
            "dispatching command"
        );

        let speed_after = match command.kind {
            // Controller first, wire second: the console must see the same
            // +/- keystroke we applied locally
            CommandKind::SpeedChange(action) => self.speed.apply(action),
            _ => self.speed.get(),
        };

        if let Some(frame) = translate(&command.kind, speed_after) {
            self.send_with_retry(&frame).await?;
        }

        self.meta.touch();
        Ok(CommandOutcome { speed: speed_after })
    }

    /// Send one frame, retrying with exponential backoff on transport errors.
    ///
    /// A send that fails marks the channel dead; the next attempt reopens it
    /// through the factory. Exhausting the budget degrades the session, and a
    /// second exhaustion while degraded closes it for good.
    async fn send_with_retry(&mut self, frame: &[u8]) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_send(frame).await {
                Ok(()) => {
                    if self.meta.state() == SessionState::Degraded
                        && self.meta.transition(SessionState::Active)
                    {
                        info!(session = %self.meta.id(), "transport recovered, session active");
                    }
                    return Ok(());
                }
                Err(err) => {
                    // Channel is suspect; reopen before the next attempt
                    self.channel = None;

                    if attempt >= MAX_RETRIES {
                        return Err(self.give_up(attempt + 1, err).await);
                    }
                    let delay = retry_backoff(attempt);
                    warn!(
                        session = %self.meta.id(),
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "send failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_send(&mut self, frame: &[u8]) -> std::result::Result<(), ChannelError> {
        if self.channel.is_none() {
            let channel = self.factory.open(&self.endpoint).await?;
            info!(session = %self.meta.id(), endpoint = %self.endpoint, "channel reopened");
            self.channel = Some(channel);
        }
        match self.channel.as_mut() {
            Some(channel) => channel.send(frame).await,
            None => Err(ChannelError::Closed),
        }
    }

    /// Retry budget spent: degrade, or close if already degraded
    async fn give_up(&mut self, attempts: u32, source: ChannelError) -> TeleopError {
        match self.meta.state() {
            SessionState::Active => {
                self.meta.transition(SessionState::Degraded);
                warn!(
                    session = %self.meta.id(),
                    attempts,
                    "retries exhausted, session degraded"
                );
            }
            SessionState::Degraded => {
                warn!(
                    session = %self.meta.id(),
                    attempts,
                    "retries exhausted while degraded, closing session"
                );
                self.close_for_good().await;
            }
            SessionState::Closed => {}
        }
        TeleopError::Transport { attempts, source }
    }

    /// Explicit close request: in-flight work already finished (we run after
    /// it in queue order), so just tear down
    async fn shutdown(&mut self) {
        if self.meta.is_live() {
            self.close_for_good().await;
            info!(session = %self.meta.id(), robot = %self.meta.robot(), "session closed");
        } else {
            // Already closed by a fatal transport error; channel is gone
            self.release_channel().await;
        }
    }

    async fn close_for_good(&mut self) {
        self.meta.transition(SessionState::Closed);
        self.release_channel().await;
    }

    /// Release the channel exactly once; failures are logged, not propagated
    async fn release_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(err) = channel.shutdown().await {
                warn!(session = %self.meta.id(), error = %err, "channel shutdown failed");
            }
        }
    }
}
