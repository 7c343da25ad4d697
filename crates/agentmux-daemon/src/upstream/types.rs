//! Upstream connection types.

use std::future::Future;

use tokio::io::AsyncRead;

use crate::relay::UpstreamWriter;

/// Read half of an upstream connection.
pub type UpstreamReader = Box<dyn AsyncRead + Send + Unpin>;

/// What the connector needs to know to (re)establish the session.
#[derive(Debug, Clone, Default)]
pub struct ConnectContext {
    /// Upstream session id from the last `system/init`, if any.
    pub resume_session: Option<String>,
    /// Model the session last ran with, including acknowledged switches.
    /// Takes precedence over the configured model.
    pub model: Option<String>,
}

/// A freshly established upstream transport.
pub struct UpstreamConnection {
    pub reader: UpstreamReader,
    pub writer: UpstreamWriter,
    /// Human-readable origin for logs and connection notices.
    pub label: String,
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Supplies upstream connections to the supervisor.
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Establish a new connection.
    fn connect(
        &self,
        ctx: &ConnectContext,
    ) -> impl Future<Output = Result<UpstreamConnection, UpstreamError>> + Send;

    /// Tear down whatever the last `connect` created. Called after the read
    /// half reached EOF or on shutdown; must be idempotent.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Errors establishing an upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Failed to spawn agent process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Agent process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
