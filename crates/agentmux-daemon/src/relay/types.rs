//! Relay module types.

use agentmux_core::command::ClientCommand;
use agentmux_core::config::{PermissionConfig, RelayConfig};
use agentmux_core::downstream::ResumeFrom;
use agentmux_core::event::{SessionSnapshot, UpstreamState};
use tokio::sync::oneshot;

use crate::permission::{CorrelatorConfig, CorrelatorError};
use crate::session::{FanoutConfig, SubscribeError, Subscription};

use super::sink::SinkError;

/// Sizing and timing for one relay instance.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Events retained for incremental replay.
    pub backlog_capacity: usize,
    pub fanout: FanoutConfig,
    pub correlator: CorrelatorConfig,
    /// Denominator for the context usage percentage.
    pub context_window_tokens: u64,
    /// Relay mailbox length.
    pub mailbox_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            backlog_capacity: 4096,
            fanout: FanoutConfig::default(),
            correlator: CorrelatorConfig::default(),
            context_window_tokens: 200_000,
            mailbox_capacity: 256,
        }
    }
}

impl RelayOptions {
    pub fn from_config(relay: &RelayConfig, permissions: &PermissionConfig) -> Self {
        Self {
            backlog_capacity: relay.backlog_capacity,
            fanout: FanoutConfig {
                max_subscribers: relay.max_subscribers,
                queue_capacity: relay.subscriber_queue_capacity,
            },
            correlator: CorrelatorConfig {
                timeout: permissions.timeout(),
                tombstone_capacity: permissions.tombstone_capacity,
            },
            context_window_tokens: relay.context_window_tokens,
            ..Self::default()
        }
    }
}

/// Parameters for [`RelayHandle::subscribe`](super::RelayHandle::subscribe).
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub subscriber_id: String,
    pub client_type: String,
    pub resume: ResumeFrom,
}

/// Successful command submission.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Queued for the upstream (or resolved locally).
    Accepted,
    /// Reply to [`ClientCommand::Snapshot`].
    Snapshot { seq: u64, snapshot: SessionSnapshot },
}

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub seq: u64,
    pub backlog: usize,
    pub subscribers: usize,
    pub evicted: u64,
    pub pending_permissions: usize,
}

/// Errors from relay operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Relay is shut down")]
    ActorGone,

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl RelayError {
    /// Stable code sent to the subscriber that caused the error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ActorGone => "relay_closed",
            Self::Subscribe(SubscribeError::ResyncRequired { .. }) => "resync_required",
            Self::Subscribe(SubscribeError::TooManySubscribers { .. }) => "too_many_subscribers",
            Self::Correlator(e) => e.code(),
            Self::Sink(e) => e.code(),
        }
    }
}

/// Mailbox messages for the relay actor.
pub(crate) enum RelayMessage {
    UpstreamLine(String),
    UpstreamState {
        state: UpstreamState,
        message: String,
    },
    Subscribe {
        request: SubscribeRequest,
        reply: oneshot::Sender<Result<Subscription, SubscribeError>>,
    },
    Unsubscribe {
        subscriber_id: String,
        /// Only remove this registration; `None` removes whatever is live.
        registration: Option<u64>,
    },
    Submit {
        subscriber_id: String,
        command: ClientCommand,
        reply: oneshot::Sender<Result<CommandOutcome, RelayError>>,
    },
    Snapshot {
        reply: oneshot::Sender<(u64, SessionSnapshot)>,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Shutdown,
}
