// Transport seam: opaque bidirectional channel to a robot's control process.
//
// The concrete transport (remote shell over the wire) lives outside this
// crate; the engine only needs to write frames, release the connection, and
// open fresh channels through a factory when a session starts or recovers.

use std::fmt;

use async_trait::async_trait;

/// Network location of one robot's control process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RobotEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Errors surfaced by a transport channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed by peer")]
    Closed,

    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
}

/// One live connection to a robot's control process.
///
/// A channel is exclusively owned by the session that opened it; nothing else
/// ever writes to it. Implementations may block in `send` (network write plus
/// read-for-ack) but must only suspend the calling task.
#[async_trait]
pub trait Channel: Send {
    /// Write one wire frame; resolves once the transport has accepted it
    async fn send(&mut self, frame: &[u8]) -> Result<(), ChannelError>;

    /// Release the underlying connection (best-effort)
    async fn shutdown(&mut self) -> Result<(), ChannelError>;
}

/// Opens channels to robot endpoints.
///
/// Used once per session start and again when a degraded session reconnects.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, endpoint: &RobotEndpoint) -> Result<Box<dyn Channel>, ChannelError>;
}
