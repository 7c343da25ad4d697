//! Authoritative session snapshot, sequence counter and replay backlog.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use agentmux_core::event::{LogicalEvent, SequencedEvent, SessionSnapshot};
use tracing::{debug, info};

use super::types::ReplayGap;

/// The single assigner of sequence numbers.
///
/// Owned by the relay actor; every event reaching subscribers passes through
/// [`SessionStore::apply`] exactly once.
#[derive(Debug)]
pub struct SessionStore {
    snapshot: SessionSnapshot,
    seq: u64,
    backlog: VecDeque<Arc<SequencedEvent>>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(backlog_capacity: usize) -> Self {
        let capacity = backlog_capacity.max(1);
        Self {
            snapshot: SessionSnapshot::default(),
            seq: 0,
            backlog: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Assign the next sequence number, fold the event into the snapshot and
    /// retain it for replay.
    pub fn apply(&mut self, event: LogicalEvent) -> Arc<SequencedEvent> {
        self.seq += 1;
        self.patch(&event);

        let sequenced = Arc::new(SequencedEvent {
            seq: self.seq,
            timestamp_ms: now_ms(),
            event,
        });

        if self.backlog.len() == self.capacity {
            self.backlog.pop_front();
        }
        self.backlog.push_back(Arc::clone(&sequenced));
        debug!(seq = self.seq, kind = sequenced.event.kind(), "Event sequenced");
        sequenced
    }

    fn patch(&mut self, event: &LogicalEvent) {
        let snap = &mut self.snapshot;
        match event {
            LogicalEvent::SessionInit(init) => {
                if snap.session_id.as_deref() != Some(init.session_id.as_str()) {
                    if snap.session_id.is_some() {
                        info!(
                            previous = ?snap.session_id,
                            session_id = %init.session_id,
                            "Upstream started a new session, resetting counters"
                        );
                    }
                    snap.total_cost_usd = 0.0;
                    snap.turn_count = 0;
                    snap.context_usage_percent = 0.0;
                }
                snap.session_id = Some(init.session_id.clone());
                snap.model = Some(init.model.clone());
                snap.cwd = Some(init.cwd.clone());
                snap.tools.clone_from(&init.tools);
                snap.permission_mode.clone_from(&init.permission_mode);
                snap.mcp_servers.clone_from(&init.mcp_servers);
            }
            LogicalEvent::SessionPatch(p) => {
                if let Some(model) = &p.model {
                    snap.model = Some(model.clone());
                }
                if let Some(cwd) = &p.cwd {
                    snap.cwd = Some(cwd.clone());
                }
                if let Some(tools) = &p.tools {
                    snap.tools.clone_from(tools);
                }
                if let Some(mode) = &p.permission_mode {
                    snap.permission_mode = Some(mode.clone());
                }
                if let Some(pct) = p.context_usage_percent {
                    snap.context_usage_percent = pct;
                }
                if let Some(servers) = &p.mcp_servers {
                    snap.mcp_servers.clone_from(servers);
                }
            }
            LogicalEvent::StatusChange(change) => snap.status = change.status,
            LogicalEvent::ResultSummary(result) => {
                snap.total_cost_usd += result.cost_usd.unwrap_or(0.0);
                snap.turn_count += 1;
            }
            _ => {}
        }
    }

    /// Current snapshot; consistent as of [`SessionStore::current_seq`].
    pub const fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Sequence number of the most recently applied event (0 before any).
    pub const fn current_seq(&self) -> u64 {
        self.seq
    }

    /// Oldest sequence number still retained, or `current_seq + 1` when empty.
    pub fn oldest_retained(&self) -> u64 {
        self.backlog.front().map_or(self.seq + 1, |e| e.seq)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Every retained event with a sequence number greater than `last_seq`.
    ///
    /// Fails when events after `last_seq` were already evicted, or when
    /// `last_seq` lies in the future.
    pub fn replay_from(&self, last_seq: u64) -> Result<Vec<Arc<SequencedEvent>>, ReplayGap> {
        let oldest = self.oldest_retained();
        if last_seq > self.seq || last_seq.saturating_add(1) < oldest {
            return Err(ReplayGap {
                requested: last_seq,
                oldest_available: oldest,
                current: self.seq,
            });
        }
        let skip = usize::try_from(last_seq + 1 - oldest).unwrap_or(usize::MAX);
        Ok(self.backlog.iter().skip(skip).cloned().collect())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
