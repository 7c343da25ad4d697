//! Subscriber registry and fan-out bus.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: a queue that fills up gets one final
//! [`Delivery::ResyncRequired`] and the subscriber is dropped, so a stalled
//! client cannot delay anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use agentmux_core::event::SequencedEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::types::{
    Delivery, DeliveryStream, FanoutConfig, FanoutStats, ReplayGap, SubscribeError,
};

struct SubscriberSlot {
    client_type: String,
    /// Distinguishes successive registrations under the same id.
    registration: u64,
    tx: mpsc::Sender<Delivery>,
    /// Last sequence number handed to the queue (replay included).
    last_delivered: u64,
    connected_at: Instant,
}

/// Registry of live subscribers. Owned by the relay actor.
pub struct FanoutBus {
    subscribers: HashMap<String, SubscriberSlot>,
    config: FanoutConfig,
    evicted: u64,
    next_registration: u64,
}

impl FanoutBus {
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            subscribers: HashMap::new(),
            config,
            evicted: 0,
            next_registration: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(FanoutConfig::default())
    }

    /// Register a subscriber whose stream yields `replay` and then live events.
    ///
    /// `caught_up_to` is the sequence number of the last event already
    /// published; `replay` must end there. Re-using an id replaces the old
    /// registration and ends its stream.
    pub fn register(
        &mut self,
        subscriber_id: &str,
        client_type: &str,
        replay: Vec<Arc<SequencedEvent>>,
        caught_up_to: u64,
    ) -> Result<DeliveryStream, SubscribeError> {
        if self.subscribers.remove(subscriber_id).is_some() {
            info!(subscriber_id, "Subscriber id reused, replacing registration");
        }
        if self.subscribers.len() >= self.config.max_subscribers {
            return Err(SubscribeError::TooManySubscribers {
                max: self.config.max_subscribers,
            });
        }

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(2));
        let replayed = replay.len();
        let registration = self.next_registration;
        self.next_registration += 1;
        self.subscribers.insert(
            subscriber_id.to_string(),
            SubscriberSlot {
                client_type: client_type.to_string(),
                registration,
                tx,
                last_delivered: caught_up_to,
                connected_at: Instant::now(),
            },
        );
        info!(subscriber_id, client_type, replayed, caught_up_to, "Subscriber registered");

        let replay = tokio_stream::iter(replay.into_iter().map(Delivery::Event));
        Ok(Box::pin(replay.chain(ReceiverStream::new(rx))))
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&mut self, subscriber_id: &str) -> bool {
        self.remove_slot(subscriber_id, None)
    }

    /// Remove a subscriber only if `registration` is still the live one, so a
    /// stale connection cannot evict the client that replaced it.
    pub fn release(&mut self, subscriber_id: &str, registration: u64) -> bool {
        self.remove_slot(subscriber_id, Some(registration))
    }

    /// Token of the live registration under `subscriber_id`.
    pub fn registration(&self, subscriber_id: &str) -> Option<u64> {
        self.subscribers.get(subscriber_id).map(|s| s.registration)
    }

    fn remove_slot(&mut self, subscriber_id: &str, registration: Option<u64>) -> bool {
        let live = self.subscribers.get(subscriber_id).map(|s| s.registration);
        if live.is_none() || registration.is_some_and(|r| Some(r) != live) {
            return false;
        }
        match self.subscribers.remove(subscriber_id) {
            Some(slot) => {
                info!(
                    subscriber_id,
                    client_type = %slot.client_type,
                    last_delivered = slot.last_delivered,
                    connected_secs = slot.connected_at.elapsed().as_secs(),
                    "Subscriber unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    /// Queue an event for every subscriber without waiting on any of them.
    ///
    /// `oldest_available` is reported to subscribers cut off by this call.
    pub fn publish(&mut self, event: &Arc<SequencedEvent>, oldest_available: u64) {
        let mut removed: Vec<String> = Vec::new();

        for (id, slot) in &mut self.subscribers {
            // Keep one slot free for the resync notice.
            if slot.tx.capacity() <= 1 {
                let gap = ReplayGap {
                    requested: slot.last_delivered,
                    oldest_available,
                    current: event.seq,
                };
                let _ = slot.tx.try_send(Delivery::ResyncRequired(gap));
                warn!(
                    subscriber_id = %id,
                    last_delivered = slot.last_delivered,
                    seq = event.seq,
                    "Subscriber queue full, forcing resync"
                );
                self.evicted += 1;
                removed.push(id.clone());
                continue;
            }
            match slot.tx.try_send(Delivery::Event(Arc::clone(event))) {
                Ok(()) => slot.last_delivered = event.seq,
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber_id = %id, "Subscriber stream dropped");
                    removed.push(id.clone());
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = %id, seq = event.seq, "Subscriber queue full");
                    self.evicted += 1;
                    removed.push(id.clone());
                }
            }
        }

        for id in removed {
            self.subscribers.remove(&id);
        }
    }

    /// Drop every registration, ending all streams.
    pub fn close_all(&mut self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        if count > 0 {
            info!(count, "Closed all subscriber streams");
        }
    }

    pub fn contains(&self, subscriber_id: &str) -> bool {
        self.subscribers.contains_key(subscriber_id)
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            subscribers: self.subscribers.len(),
            evicted: self.evicted,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use agentmux_core::event::{AgentStatus, LogicalEvent, StatusChange};
    use std::time::Duration;

    fn ev(seq: u64) -> Arc<SequencedEvent> {
        Arc::new(SequencedEvent {
            seq,
            timestamp_ms: 0,
            event: LogicalEvent::StatusChange(StatusChange {
                status: AgentStatus::Running,
            }),
        })
    }

    async fn next_seq(stream: &mut DeliveryStream) -> u64 {
        match tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
        {
            Some(Delivery::Event(e)) => e.seq,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replay_then_live_without_duplicates() {
        let mut bus = FanoutBus::with_defaults();
        let mut stream = bus.register("a", "cli", vec![ev(3), ev(4)], 4).unwrap();
        bus.publish(&ev(5), 1);
        bus.publish(&ev(6), 1);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_seq(&mut stream).await);
        }
        assert_eq!(seen, [3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn every_subscriber_sees_same_order() {
        let mut bus = FanoutBus::with_defaults();
        let mut a = bus.register("a", "cli", vec![], 0).unwrap();
        let mut b = bus.register("b", "web", vec![], 0).unwrap();
        for seq in 1..=20 {
            bus.publish(&ev(seq), 1);
        }
        for seq in 1..=20 {
            assert_eq!(next_seq(&mut a).await, seq);
            assert_eq!(next_seq(&mut b).await, seq);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_cut_off_without_affecting_others() {
        let mut bus = FanoutBus::new(FanoutConfig {
            max_subscribers: 4,
            queue_capacity: 4,
        });
        let mut slow = bus.register("slow", "cli", vec![], 0).unwrap();
        let mut fast = bus.register("fast", "cli", vec![], 0).unwrap();

        for seq in 1..=10 {
            bus.publish(&ev(seq), 1);
            assert_eq!(next_seq(&mut fast).await, seq);
        }
        assert!(!bus.contains("slow"));
        assert!(bus.contains("fast"));
        assert_eq!(bus.stats().evicted, 1);

        // slow drains what it got, then the resync notice, then the end
        assert_eq!(next_seq(&mut slow).await, 1);
        assert_eq!(next_seq(&mut slow).await, 2);
        assert_eq!(next_seq(&mut slow).await, 3);
        match slow.next().await {
            Some(Delivery::ResyncRequired(gap)) => {
                assert_eq!(gap.requested, 3);
                assert_eq!(gap.current, 4);
            }
            other => panic!("expected resync, got {other:?}"),
        }
        assert!(slow.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_stream_is_purged_on_publish() {
        let mut bus = FanoutBus::with_defaults();
        let stream = bus.register("gone", "cli", vec![], 0).unwrap();
        drop(stream);
        bus.publish(&ev(1), 1);
        assert_eq!(bus.stats().subscribers, 0);
        assert_eq!(bus.stats().evicted, 0);
    }

    #[tokio::test]
    async fn reused_id_replaces_registration() {
        let mut bus = FanoutBus::with_defaults();
        let mut old = bus.register("a", "cli", vec![], 0).unwrap();
        let mut new = bus.register("a", "cli", vec![], 0).unwrap();
        bus.publish(&ev(1), 1);

        assert!(old.next().await.is_none());
        assert_eq!(next_seq(&mut new).await, 1);
        assert_eq!(bus.stats().subscribers, 1);
    }

    #[tokio::test]
    async fn stale_release_keeps_replacement() {
        let mut bus = FanoutBus::with_defaults();
        let _old = bus.register("a", "cli", vec![], 0).unwrap();
        let old_registration = bus.registration("a").unwrap();
        let mut new = bus.register("a", "cli", vec![], 0).unwrap();
        let new_registration = bus.registration("a").unwrap();
        assert_ne!(old_registration, new_registration);

        assert!(!bus.release("a", old_registration));
        bus.publish(&ev(1), 1);
        assert_eq!(next_seq(&mut new).await, 1);
        assert!(bus.release("a", new_registration));
        assert!(!bus.contains("a"));
    }

    #[tokio::test]
    async fn max_subscribers_enforced() {
        let mut bus = FanoutBus::new(FanoutConfig {
            max_subscribers: 2,
            ..Default::default()
        });
        let _a = bus.register("a", "cli", vec![], 0).unwrap();
        let _b = bus.register("b", "cli", vec![], 0).unwrap();
        assert!(matches!(
            bus.register("c", "cli", vec![], 0),
            Err(SubscribeError::TooManySubscribers { max: 2 })
        ));
        // replacing an existing id is still allowed at the limit
        assert!(bus.register("a", "cli", vec![], 0).is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let mut bus = FanoutBus::with_defaults();
        let mut stream = bus.register("a", "cli", vec![], 0).unwrap();
        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
        assert!(stream.next().await.is_none());
    }
}
