//! Permission correlator types.

use std::time::Duration;

use agentmux_core::event::PermissionResolved;
use agentmux_core::ndjson::UpstreamCommand;
use serde_json::Value;
use tokio::time::Instant;

/// Configuration for the correlator.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Lifetime of an unanswered request.
    pub timeout: Duration,
    /// Resolved/cancelled ids remembered for duplicate classification.
    pub tombstone_capacity: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            tombstone_capacity: 1024,
        }
    }
}

/// A permission prompt awaiting its first answer.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Upstream correlation token; also the id subscribers answer with.
    pub request_id: String,
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    pub description: String,
    /// Original tool input, echoed back on allow.
    pub input: Value,
    pub created_at: Instant,
    pub deadline: Instant,
}

/// Parameters for opening a request.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_use_id: Option<String>,
    pub input: Value,
}

/// Outcome of an accepted answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Event announcing the decision to every subscriber.
    pub event: PermissionResolved,
    /// Frame to forward upstream.
    pub command: UpstreamCommand,
}

/// How a request left the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tombstone {
    Resolved,
    Cancelled,
}

/// Correlator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    #[error("Permission request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("Permission request already resolved: {request_id}")]
    DuplicateResolution { request_id: String },

    #[error("Permission request was cancelled: {request_id}")]
    RequestCancelled { request_id: String },
}

impl CorrelatorError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RequestNotFound { .. } => "request_not_found",
            Self::DuplicateResolution { .. } => "duplicate_resolution",
            Self::RequestCancelled { .. } => "request_cancelled",
        }
    }
}
