//! Pending permission request correlator.
//!
//! Tracks prompts raised by the agent until the first subscriber answer, the
//! deadline, or an upstream cancellation. Ids that left the pending set are
//! kept as tombstones so late and duplicate answers are classified instead of
//! being reported as unknown.

use std::collections::{HashMap, VecDeque};

use agentmux_core::command::PermissionDecision;
use agentmux_core::event::{
    CancelReason, PermissionCancelled, PermissionRequest, PermissionResolved,
};
use agentmux_core::ndjson::UpstreamCommand;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{
    CorrelatorConfig, CorrelatorError, OpenRequest, PendingRequest, Resolution, Tombstone,
};

/// Correlates permission prompts with subscriber answers. Owned by the relay
/// actor, so no interior locking.
#[derive(Debug)]
pub struct Correlator {
    pending: HashMap<String, PendingRequest>,
    tombstones: HashMap<String, Tombstone>,
    tombstone_order: VecDeque<String>,
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            pending: HashMap::new(),
            tombstones: HashMap::new(),
            tombstone_order: VecDeque::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CorrelatorConfig::default())
    }

    /// Register a prompt and build the event announcing it.
    ///
    /// Returns `None` if the id is already pending (upstream re-sent it).
    pub fn open(&mut self, params: OpenRequest, now: Instant) -> Option<PermissionRequest> {
        if self.pending.contains_key(&params.request_id) {
            warn!(request_id = %params.request_id, "Permission request already pending, ignoring");
            return None;
        }

        info!(
            request_id = %params.request_id,
            tool_name = %params.tool_name,
            "Permission request opened"
        );
        let request = PendingRequest {
            request_id: params.request_id.clone(),
            tool_name: params.tool_name,
            tool_use_id: params.tool_use_id,
            description: summarize_input(&params.input),
            input: params.input,
            created_at: now,
            deadline: now + self.config.timeout,
        };
        let event = announcement(&request, now);
        self.pending.insert(params.request_id, request);
        Some(event)
    }

    /// Accept the first answer for `request_id`.
    ///
    /// On allow, the upstream receives `updated_input` when given, otherwise
    /// the original tool input.
    pub fn resolve(
        &mut self,
        request_id: &str,
        decision: PermissionDecision,
        updated_input: Option<Value>,
        message: Option<String>,
        from_subscriber: &str,
    ) -> Result<Resolution, CorrelatorError> {
        let Some(request) = self.pending.remove(request_id) else {
            let err = match self.tombstones.get(request_id) {
                Some(Tombstone::Resolved) => CorrelatorError::DuplicateResolution {
                    request_id: request_id.to_string(),
                },
                Some(Tombstone::Cancelled) => CorrelatorError::RequestCancelled {
                    request_id: request_id.to_string(),
                },
                None => CorrelatorError::RequestNotFound {
                    request_id: request_id.to_string(),
                },
            };
            warn!(
                request_id,
                subscriber_id = from_subscriber,
                error = %err,
                "Permission answer rejected"
            );
            return Err(err);
        };
        self.bury(request_id, Tombstone::Resolved);

        info!(
            request_id,
            subscriber_id = from_subscriber,
            ?decision,
            waited_ms = u64::try_from(request.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Permission request resolved"
        );

        Ok(Resolution {
            event: PermissionResolved {
                request_id: request.request_id.clone(),
                decision,
                resolved_by: from_subscriber.to_string(),
            },
            command: UpstreamCommand::PermissionResponse {
                request_id: request.request_id,
                allow: decision.is_allow(),
                updated_input: updated_input.unwrap_or(request.input),
                message,
            },
        })
    }

    /// Cancel one pending request. Returns `None` if it is not pending.
    pub fn cancel(
        &mut self,
        request_id: &str,
        reason: CancelReason,
    ) -> Option<PermissionCancelled> {
        self.pending.remove(request_id)?;
        self.bury(request_id, Tombstone::Cancelled);
        info!(request_id, ?reason, "Permission request cancelled");
        Some(PermissionCancelled {
            request_id: request_id.to_string(),
            reason,
        })
    }

    /// Cancel every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<PermissionCancelled> {
        let mut expired: Vec<&PendingRequest> = self
            .pending
            .values()
            .filter(|r| r.deadline <= now)
            .collect();
        expired.sort_by_key(|r| r.deadline);
        let ids: Vec<String> = expired.into_iter().map(|r| r.request_id.clone()).collect();

        ids.iter()
            .filter_map(|id| {
                warn!(request_id = %id, "Permission request timed out");
                self.cancel(id, CancelReason::Timeout)
            })
            .collect()
    }

    /// Cancel everything, e.g. when the upstream connection is lost.
    pub fn cancel_all(&mut self, reason: CancelReason) -> Vec<PermissionCancelled> {
        let mut ids: Vec<(Instant, String)> = self
            .pending
            .values()
            .map(|r| (r.created_at, r.request_id.clone()))
            .collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|(_, id)| self.cancel(&id, reason))
            .collect()
    }

    /// Earliest deadline among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|r| r.deadline).min()
    }

    /// Unanswered prompts, oldest first, with `timeout_ms` counting down from `now`.
    pub fn pending_requests(&self, now: Instant) -> Vec<PermissionRequest> {
        let mut requests: Vec<&PendingRequest> = self.pending.values().collect();
        requests.sort_by_key(|r| r.created_at);
        requests.into_iter().map(|r| announcement(r, now)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn bury(&mut self, request_id: &str, tombstone: Tombstone) {
        if self
            .tombstones
            .insert(request_id.to_string(), tombstone)
            .is_none()
        {
            self.tombstone_order.push_back(request_id.to_string());
        }
        while self.tombstone_order.len() > self.config.tombstone_capacity {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                debug!(request_id = %oldest, "Forgetting permission tombstone");
                self.tombstones.remove(&oldest);
            }
        }
    }
}

fn announcement(request: &PendingRequest, now: Instant) -> PermissionRequest {
    let remaining = request.deadline.saturating_duration_since(now);
    PermissionRequest {
        request_id: request.request_id.clone(),
        tool_name: request.tool_name.clone(),
        tool_use_id: request.tool_use_id.clone(),
        description: request.description.clone(),
        input: request.input.clone(),
        timeout_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
    }
}

/// One-line summary of a tool input: the first string field, or the input
/// itself when it is a bare string. Tool semantics are left to the agent.
fn summarize_input(input: &Value) -> String {
    let text = match input {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj.values().find_map(Value::as_str),
        _ => None,
    };
    text.map(|s| truncate(s, 120)).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let boundary = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= max)
        .last()
        .unwrap_or(0);
    format!("{}...", &s[..boundary])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn bash(id: &str) -> OpenRequest {
        OpenRequest {
            request_id: id.into(),
            tool_name: "Bash".into(),
            tool_use_id: Some("toolu_1".into()),
            input: json!({"command": "cargo test", "timeout": 30000}),
        }
    }

    #[test]
    fn open_builds_request_event() {
        let mut c = Correlator::with_defaults();
        let event = c.open(bash("req_1"), Instant::now()).unwrap();
        assert_eq!(event.request_id, "req_1");
        assert_eq!(event.description, "cargo test");
        assert_eq!(event.timeout_ms, 300_000);
        assert_eq!(c.len(), 1);

        assert!(c.open(bash("req_1"), Instant::now()).is_none());
    }

    #[test]
    fn allow_echoes_original_input() {
        let mut c = Correlator::with_defaults();
        c.open(bash("req_1"), Instant::now());
        let res = c
            .resolve("req_1", PermissionDecision::Allow, None, None, "sub-a")
            .unwrap();

        assert_eq!(res.event.resolved_by, "sub-a");
        let UpstreamCommand::PermissionResponse {
            allow,
            updated_input,
            ..
        } = res.command
        else {
            panic!("expected permission response");
        };
        assert!(allow);
        assert_eq!(updated_input["command"], "cargo test");
        assert!(c.is_empty());
    }

    #[test]
    fn modified_parameters_replace_input() {
        let mut c = Correlator::with_defaults();
        c.open(bash("req_1"), Instant::now());
        let res = c
            .resolve(
                "req_1",
                PermissionDecision::Allow,
                Some(json!({"command": "cargo check"})),
                None,
                "sub-a",
            )
            .unwrap();
        assert!(matches!(
            res.command,
            UpstreamCommand::PermissionResponse { ref updated_input, .. } if updated_input["command"] == "cargo check"
        ));
    }

    #[test]
    fn second_answer_is_duplicate() {
        let mut c = Correlator::with_defaults();
        c.open(bash("req_1"), Instant::now());
        assert!(
            c.resolve("req_1", PermissionDecision::Deny, None, None, "a")
                .is_ok()
        );
        assert_eq!(
            c.resolve("req_1", PermissionDecision::Allow, None, None, "b"),
            Err(CorrelatorError::DuplicateResolution {
                request_id: "req_1".into()
            })
        );
    }

    #[test]
    fn unknown_id_is_not_found() {
        let mut c = Correlator::with_defaults();
        assert!(matches!(
            c.resolve("nope", PermissionDecision::Allow, None, None, "a"),
            Err(CorrelatorError::RequestNotFound { .. })
        ));
    }

    #[test]
    fn expiry_cancels_and_rejects_late_answer() {
        let mut c = Correlator::new(CorrelatorConfig {
            timeout: Duration::from_secs(10),
            ..Default::default()
        });
        let start = Instant::now();
        c.open(bash("req_1"), start);
        c.open(bash("req_2"), start + Duration::from_secs(5));
        assert_eq!(c.next_deadline(), Some(start + Duration::from_secs(10)));

        assert!(c.expire(start + Duration::from_secs(9)).is_empty());
        let expired = c.expire(start + Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, "req_1");
        assert_eq!(expired[0].reason, CancelReason::Timeout);

        assert_eq!(
            c.resolve("req_1", PermissionDecision::Allow, None, None, "a"),
            Err(CorrelatorError::RequestCancelled {
                request_id: "req_1".into()
            })
        );
        assert_eq!(c.next_deadline(), Some(start + Duration::from_secs(15)));
    }

    #[test]
    fn cancel_all_on_disconnect() {
        let mut c = Correlator::with_defaults();
        let now = Instant::now();
        c.open(bash("req_1"), now);
        c.open(bash("req_2"), now + Duration::from_millis(1));
        let cancelled = c.cancel_all(CancelReason::UpstreamDisconnected);
        assert_eq!(
            cancelled.iter().map(|e| e.request_id.as_str()).collect::<Vec<_>>(),
            ["req_1", "req_2"]
        );
        assert!(c.is_empty());
        assert!(c.next_deadline().is_none());
    }

    #[test]
    fn tombstones_are_bounded() {
        let mut c = Correlator::new(CorrelatorConfig {
            tombstone_capacity: 2,
            ..Default::default()
        });
        for id in ["r1", "r2", "r3"] {
            c.open(bash(id), Instant::now());
            c.resolve(id, PermissionDecision::Allow, None, None, "a")
                .unwrap();
        }
        assert!(matches!(
            c.resolve("r1", PermissionDecision::Allow, None, None, "a"),
            Err(CorrelatorError::RequestNotFound { .. })
        ));
        assert!(matches!(
            c.resolve("r3", PermissionDecision::Allow, None, None, "a"),
            Err(CorrelatorError::DuplicateResolution { .. })
        ));
    }

    #[test]
    fn input_summary_uses_first_string_field() {
        assert_eq!(
            summarize_input(&json!({"file_path": "/tmp/a.rs", "limit": 10})),
            "/tmp/a.rs"
        );
        assert_eq!(
            summarize_input(&json!({"count": 3, "query": "rust async"})),
            "rust async"
        );
        assert_eq!(summarize_input(&json!("plain")), "plain");
        assert_eq!(summarize_input(&json!({"n": 1})), "");
        assert_eq!(summarize_input(&Value::Null), "");
        let long = "x".repeat(200);
        assert!(summarize_input(&json!({"command": long})).ends_with("..."));
    }

    #[test]
    fn pending_requests_report_remaining_time() {
        let mut c = Correlator::with_defaults();
        let start = Instant::now();
        c.open(bash("r1"), start);
        c.open(bash("r2"), start + Duration::from_secs(1));
        c.open(bash("r3"), start + Duration::from_secs(2));
        c.resolve("r2", PermissionDecision::Deny, None, None, "a")
            .unwrap();

        let pending = c.pending_requests(start + Duration::from_secs(100));
        let ids: Vec<_> = pending.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, ["r1", "r3"]);
        assert_eq!(pending[0].timeout_ms, 200_000);
        assert_eq!(pending[1].timeout_ms, 202_000);
        assert_eq!(pending[0].description, "cargo test");

        let overdue = c.pending_requests(start + Duration::from_secs(900));
        assert_eq!(overdue[0].timeout_ms, 0);
    }
}
