//! Logical event vocabulary delivered to subscribers.
//!
//! Upstream frames are decoded and reassembled into these events; each one is
//! stamped with a sequence number by the session store before fan-out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::ndjson::{McpServerStatus, Usage};

/// A fully reassembled unit of session activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalEvent {
    SessionInit(SessionInit),
    SessionPatch(SessionPatch),
    MessageComplete(MessageComplete),
    StreamDelta(StreamDelta),
    ToolProgress(ToolProgress),
    PermissionRequest(PermissionRequest),
    PermissionResolved(PermissionResolved),
    PermissionCancelled(PermissionCancelled),
    ResultSummary(ResultSummary),
    StatusChange(StatusChange),
    ConnectionNotice(ConnectionNotice),
    Error(ErrorEvent),
    /// Well-formed upstream frame of a type this build does not know.
    Unknown { tag: String, payload: Value },
}

impl LogicalEvent {
    /// Event tag as it appears on the wire.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionInit(_) => "session_init",
            Self::SessionPatch(_) => "session_patch",
            Self::MessageComplete(_) => "message_complete",
            Self::StreamDelta(_) => "stream_delta",
            Self::ToolProgress(_) => "tool_progress",
            Self::PermissionRequest(_) => "permission_request",
            Self::PermissionResolved(_) => "permission_resolved",
            Self::PermissionCancelled(_) => "permission_cancelled",
            Self::ResultSummary(_) => "result_summary",
            Self::StatusChange(_) => "status_change",
            Self::ConnectionNotice(_) => "connection_notice",
            Self::Error(_) => "error",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorEvent {
            code,
            message: message.into(),
        })
    }
}

/// An event together with its position in the global session order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    /// Milliseconds since the unix epoch at sequence assignment.
    pub timestamp_ms: u64,
    pub event: LogicalEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInit {
    pub session_id: String,
    pub model: String,
    pub cwd: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerStatus>,
}

/// Partial snapshot update; `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<McpServerStatus>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
}

/// A message whose content blocks are fully assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageComplete {
    #[serde(default)]
    pub message_id: Option<String>,
    pub role: Role,
    pub blocks: Vec<CompletedBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletedBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    Other {
        block_type: String,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    ToolUse,
    Thinking,
    Other,
}

/// Incremental content for live rendering. A block start is announced as a
/// delta carrying the block's initial content (usually empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub message_id: Option<String>,
    pub index: u32,
    pub kind: BlockKind,
    pub delta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProgress {
    pub tool_use_id: String,
    pub tool_name: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    pub description: String,
    pub input: Value,
    /// Time left before the relay cancels the prompt.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResolved {
    pub request_id: String,
    pub decision: crate::command::PermissionDecision,
    /// Subscriber whose answer was forwarded upstream.
    pub resolved_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCancelled {
    pub request_id: String,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Timeout,
    Upstream,
    UpstreamDisconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub subtype: String,
    pub is_error: bool,
    pub duration_ms: u64,
    pub num_turns: u32,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Compacting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected but silent for longer than the keep-alive interval.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    pub state: UpstreamState,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    DecodeError,
    ProtocolViolation,
    StreamInterrupted,
    SessionError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: ErrorCode,
    pub message: String,
}

/// Authoritative session state as of a sequence number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub tools: Vec<String>,
    pub permission_mode: Option<String>,
    pub total_cost_usd: f64,
    pub turn_count: u64,
    pub context_usage_percent: f64,
    pub status: AgentStatus,
    pub mcp_servers: Vec<McpServerStatus>,
    /// Prompts still awaiting an answer, oldest first. Filled in by the relay
    /// when the snapshot is handed out, with `timeout_ms` as time remaining.
    #[serde(default)]
    pub pending_permissions: Vec<PermissionRequest>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let ev = LogicalEvent::StatusChange(StatusChange {
            status: AgentStatus::Compacting,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["status"], "compacting");
    }

    #[test]
    fn empty_patch_serializes_to_tag_only() {
        let ev = LogicalEvent::SessionPatch(SessionPatch::default());
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"session_patch"}"#);
    }

    #[test]
    fn completed_blocks_carry_kind() {
        let block = CompletedBlock::ToolUse {
            id: "toolu_1".into(),
            name: "Bash".into(),
            input: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["kind"], "tool_use");
        assert_eq!(json["input"]["command"], "ls");
    }

    #[test]
    fn sequenced_event_parses_back() {
        let line = r#"{"seq":7,"timestamp_ms":1,"event":{"type":"permission_cancelled","request_id":"r1","reason":"timeout"}}"#;
        let ev: SequencedEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.seq, 7);
        assert_eq!(
            ev.event,
            LogicalEvent::PermissionCancelled(PermissionCancelled {
                request_id: "r1".into(),
                reason: CancelReason::Timeout,
            })
        );
    }
}
