//! Frame types for the upstream stream-json protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Canonical inbound frames from the agent process.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SystemInit(SystemInit),
    SystemStatus(SystemStatus),
    Assistant(AssistantMessage),
    User(UserMessage),
    StreamEvent(StreamEvent),
    ControlRequest(ControlRequest),
    ControlCancel { request_id: String },
    ControlResponse(ControlResponse),
    Result(SessionResult),
    ToolProgress(ToolProgress),
    KeepAlive,
    Unknown { msg_type: String, payload: Value },
}

impl Message {
    /// Short frame kind for log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SystemInit(_) => "system_init",
            Self::SystemStatus(_) => "system_status",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::StreamEvent(_) => "stream_event",
            Self::ControlRequest(_) => "control_request",
            Self::ControlCancel { .. } => "control_cancel_request",
            Self::ControlResponse(_) => "control_response",
            Self::Result(_) => "result",
            Self::ToolProgress(_) => "tool_progress",
            Self::KeepAlive => "keep_alive",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// System initialization frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInit {
    pub session_id: String,
    pub model: String,
    pub cwd: PathBuf,
    pub tools: Vec<String>,
    pub permission_mode: Option<String>,
    pub mcp_servers: Vec<McpServerStatus>,
}

/// Connection status of one MCP peer, as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerStatus {
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// `system` frame with `subtype: "status"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    /// `Some("compacting")` while the agent compacts its context, `None` after.
    pub status: Option<String>,
}

/// Complete assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub id: Option<String>,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

/// Content block in an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
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
}

/// Reason the assistant stopped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    Unknown(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::Unknown(s) => s,
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl Usage {
    /// Tokens occupying the context window on the last request.
    pub const fn context_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_read_input_tokens)
            .saturating_add(self.cache_creation_input_tokens)
    }
}

/// User message (tool results echo).
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub content: Vec<ToolResult>,
}

/// Tool execution result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    /// String or array of content parts, passed through untouched.
    pub content: Value,
    pub is_error: bool,
}

/// Streaming event for real-time output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
}

/// Stream event types.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventType {
    ContentBlockStart { index: u32, block: BlockStart },
    ContentBlockDelta { index: u32, delta: Delta },
    ContentBlockStop { index: u32 },
    MessageStart { message_id: Option<String> },
    MessageDelta { stop_reason: Option<String> },
    MessageStop,
    Unknown(Value),
}

/// Header of a content block announced by `content_block_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStart {
    pub block_type: BlockType,
    /// Tool call id, for `tool_use` blocks.
    pub tool_use_id: Option<String>,
    /// Tool name, for `tool_use` blocks.
    pub name: Option<String>,
    /// Initial text carried on the start event (usually empty).
    pub initial: String,
}

/// Kind of content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    Text,
    ToolUse,
    Thinking,
    Other(String),
}

/// Delta content in streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    InputJson(String),
    Thinking(String),
    Signature(String),
    Unknown(Value),
}

/// Permission or input request from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub request_id: String,
    pub request: ControlRequestType,
}

/// Control request type.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequestType {
    CanUseTool {
        tool_name: String,
        input: Value,
        tool_use_id: Option<String>,
    },
    Unknown(Value),
}

/// Acknowledgement of a control request the relay sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub request_id: Option<String>,
    pub subtype: String,
    pub error: Option<String>,
}

/// Turn completion result.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub subtype: ResultSubtype,
    pub is_error: bool,
    pub session_id: String,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub cost_usd: Option<f64>,
    pub usage: Usage,
    pub errors: Vec<String>,
}

/// Result subtype.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultSubtype {
    #[default]
    Success,
    Error,
    Unknown(String),
}

impl ResultSubtype {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown(s) => s,
        }
    }
}

/// Periodic progress report for a long-running tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolProgress {
    pub tool_use_id: String,
    pub tool_name: String,
    pub elapsed_secs: f64,
}
