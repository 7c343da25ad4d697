//! Session store and fan-out types.

use std::pin::Pin;
use std::sync::Arc;

use agentmux_core::event::{SequencedEvent, SessionSnapshot};
use tokio_stream::Stream;

/// Configuration for the fan-out bus.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Maximum concurrently registered subscribers.
    pub max_subscribers: usize,
    /// Per-subscriber queue length before the subscriber is cut off.
    pub queue_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 16,
            queue_capacity: 1024,
        }
    }
}

/// Incremental replay from the requested point is impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayGap {
    pub requested: u64,
    pub oldest_available: u64,
    pub current: u64,
}

/// An item on a subscriber's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Arc<SequencedEvent>),
    /// The subscriber fell behind and was removed; this is the last item.
    ResyncRequired(ReplayGap),
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// A registered subscriber: replayed backlog followed by live events.
pub struct Subscription {
    pub subscriber_id: String,
    /// Token for [`RelayHandle::release`](crate::relay::RelayHandle::release).
    pub registration: u64,
    /// Sequence number the subscriber is caught up to once replay drains.
    pub seq: u64,
    /// Present when the subscriber asked to start from a snapshot.
    pub snapshot: Option<SessionSnapshot>,
    pub stream: DeliveryStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("registration", &self.registration)
            .field("seq", &self.seq)
            .field("snapshot", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

/// Bus statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutStats {
    pub subscribers: usize,
    /// Subscribers removed because their queue overflowed.
    pub evicted: u64,
}

/// Subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error(
        "Replay from {requested} unavailable (oldest retained {oldest_available}, current {current})"
    )]
    ResyncRequired {
        requested: u64,
        oldest_available: u64,
        current: u64,
    },

    #[error("Too many subscribers (max: {max})")]
    TooManySubscribers { max: usize },
}

impl From<ReplayGap> for SubscribeError {
    fn from(gap: ReplayGap) -> Self {
        Self::ResyncRequired {
            requested: gap.requested,
            oldest_available: gap.oldest_available,
            current: gap.current,
        }
    }
}
