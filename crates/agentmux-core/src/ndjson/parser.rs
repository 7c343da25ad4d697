//! Stream-json frame parser.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! returned as [`Message::Unknown`] so they can be forwarded opaquely. Only
//! fields the relay's state machine depends on (frame `type`, block `index`,
//! `request_id`) are mandatory.

use serde_json::Value;

use super::types::{
    AssistantMessage, BlockStart, BlockType, ContentBlock, ControlRequest, ControlRequestType,
    ControlResponse, Delta, McpServerStatus, Message, ResultSubtype, SessionResult, StopReason,
    StreamEvent, StreamEventType, SystemInit, SystemStatus, ToolProgress, ToolResult, Usage,
    UserMessage,
};
use crate::error::{Error, Result};

/// Parse a single NDJSON line from the agent's stdout.
pub fn parse_line(line: &str) -> Result<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(Error::Decode("Empty frame".into()));
    }
    let raw: Value = serde_json::from_str(trimmed)?;
    parse_value(&raw)
}

/// Parse a JSON value into a canonical message.
pub fn parse_value(raw: &Value) -> Result<Message> {
    if !raw.is_object() {
        return Err(Error::Decode("Frame is not a JSON object".into()));
    }
    let msg_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Decode("Missing 'type' field".into()))?;

    match msg_type {
        "system" => Ok(parse_system(raw)),
        "assistant" => Ok(parse_assistant(raw)),
        "user" => Ok(parse_user(raw)),
        "stream_event" => parse_stream_event(raw),
        "control_request" => parse_control_request(raw),
        "control_cancel_request" => Ok(Message::ControlCancel {
            request_id: required_str(raw, "request_id")?,
        }),
        "control_response" => Ok(parse_control_response(raw)),
        "result" => Ok(parse_result(raw)),
        "tool_progress" => parse_tool_progress(raw),
        "keep_alive" => Ok(Message::KeepAlive),
        _ => Ok(Message::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        }),
    }
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn required_str(raw: &Value, key: &str) -> Result<String> {
    str_field(raw, key).ok_or_else(|| Error::Decode(format!("Missing '{key}'")))
}

fn required_index(event: &Value) -> Result<u32> {
    event
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| Error::Decode("Missing or invalid block 'index'".into()))
}

fn parse_system(raw: &Value) -> Message {
    match raw.get("subtype").and_then(|v| v.as_str()) {
        Some("init") | None => Message::SystemInit(parse_system_init(raw)),
        Some("status") => Message::SystemStatus(SystemStatus {
            status: str_field(raw, "status"),
        }),
        Some(_) => Message::Unknown {
            msg_type: "system".to_string(),
            payload: raw.clone(),
        },
    }
}

fn parse_system_init(raw: &Value) -> SystemInit {
    // Tools arrive as bare names; older builds sent `{name, ...}` objects.
    let tools = raw
        .get("tools")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    t.as_str()
                        .map(String::from)
                        .or_else(|| str_field(t, "name"))
                })
                .collect()
        })
        .unwrap_or_default();

    let mcp_servers: Vec<McpServerStatus> = raw
        .get("mcp_servers")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    SystemInit {
        session_id: str_field(raw, "session_id").unwrap_or_default(),
        model: str_field(raw, "model").unwrap_or_default(),
        cwd: raw
            .get("cwd")
            .and_then(|v| v.as_str())
            .map(std::path::PathBuf::from)
            .unwrap_or_default(),
        tools,
        permission_mode: str_field(raw, "permissionMode")
            .or_else(|| str_field(raw, "permission_mode")),
        mcp_servers,
    }
}

fn parse_assistant(raw: &Value) -> Message {
    let msg = raw.get("message").unwrap_or(raw);

    Message::Assistant(AssistantMessage {
        id: str_field(msg, "id"),
        content: parse_content_blocks(msg.get("content")),
        stop_reason: parse_stop_reason(msg.get("stop_reason")),
    })
}

fn parse_content_blocks(content: Option<&Value>) -> Vec<ContentBlock> {
    let Some(arr) = content.and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    arr.iter()
        .filter_map(|block| {
            let block_type = block.get("type")?.as_str()?;
            match block_type {
                "text" => {
                    let text = block.get("text")?.as_str()?.to_string();
                    Some(ContentBlock::Text { text })
                }
                "tool_use" => {
                    let id = block.get("id")?.as_str()?.to_string();
                    let name = block.get("name")?.as_str()?.to_string();
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                "thinking" => {
                    let thinking = block.get("thinking")?.as_str()?.to_string();
                    Some(ContentBlock::Thinking { thinking })
                }
                _ => None,
            }
        })
        .collect()
}

fn parse_stop_reason(val: Option<&Value>) -> StopReason {
    match val.and_then(|v| v.as_str()) {
        Some("end_turn") | None => StopReason::EndTurn,
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some(other) => StopReason::Unknown(other.to_string()),
    }
}

pub(crate) fn parse_usage(val: Option<&Value>) -> Usage {
    val.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn parse_user(raw: &Value) -> Message {
    let msg = raw.get("message").unwrap_or(raw);
    let content = msg
        .get("content")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|block| {
                    if block.get("type")?.as_str()? != "tool_result" {
                        return None;
                    }
                    Some(ToolResult {
                        tool_use_id: block.get("tool_use_id")?.as_str()?.to_string(),
                        content: block.get("content").cloned().unwrap_or(Value::Null),
                        is_error: block
                            .get("is_error")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Message::User(UserMessage { content })
}

fn parse_block_start(event: &Value) -> BlockStart {
    let block = event.get("content_block").unwrap_or(&Value::Null);
    let block_type = match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
        "text" => BlockType::Text,
        "tool_use" | "server_tool_use" => BlockType::ToolUse,
        "thinking" | "redacted_thinking" => BlockType::Thinking,
        other => BlockType::Other(other.to_string()),
    };
    let initial = match block_type {
        BlockType::Thinking => str_field(block, "thinking"),
        _ => str_field(block, "text"),
    }
    .unwrap_or_default();

    BlockStart {
        block_type,
        tool_use_id: str_field(block, "id"),
        name: str_field(block, "name"),
        initial,
    }
}

fn parse_delta(delta: Value) -> Delta {
    let delta_type = str_field(&delta, "type").unwrap_or_default();
    let text_of = |key: &str| str_field(&delta, key).unwrap_or_default();
    match delta_type.as_str() {
        "text_delta" => Delta::Text(text_of("text")),
        "input_json_delta" => Delta::InputJson(text_of("partial_json")),
        "thinking_delta" => Delta::Thinking(text_of("thinking")),
        "signature_delta" => Delta::Signature(text_of("signature")),
        _ => Delta::Unknown(delta),
    }
}

fn parse_stream_event(raw: &Value) -> Result<Message> {
    let event = raw.get("event").unwrap_or(raw);
    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");

    let stream_type = match event_type {
        "content_block_start" => StreamEventType::ContentBlockStart {
            index: required_index(event)?,
            block: parse_block_start(event),
        },
        "content_block_delta" => StreamEventType::ContentBlockDelta {
            index: required_index(event)?,
            delta: parse_delta(event.get("delta").cloned().unwrap_or(Value::Null)),
        },
        "content_block_stop" => StreamEventType::ContentBlockStop {
            index: required_index(event)?,
        },
        "message_start" => StreamEventType::MessageStart {
            message_id: event.get("message").and_then(|m| str_field(m, "id")),
        },
        "message_delta" => StreamEventType::MessageDelta {
            stop_reason: event
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
                .map(String::from),
        },
        "message_stop" => StreamEventType::MessageStop,
        _ => StreamEventType::Unknown(event.clone()),
    };

    Ok(Message::StreamEvent(StreamEvent {
        event_type: stream_type,
    }))
}

fn parse_control_request(raw: &Value) -> Result<Message> {
    let request_id = required_str(raw, "request_id")?;

    let request = raw.get("request").cloned().unwrap_or(Value::Null);
    let subtype = request
        .get("subtype")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let request_type = match subtype {
        "can_use_tool" => ControlRequestType::CanUseTool {
            tool_name: str_field(&request, "tool_name").unwrap_or_default(),
            input: request.get("input").cloned().unwrap_or(Value::Null),
            tool_use_id: str_field(&request, "tool_use_id"),
        },
        _ => ControlRequestType::Unknown(request),
    };

    Ok(Message::ControlRequest(ControlRequest {
        request_id,
        request: request_type,
    }))
}

fn parse_control_response(raw: &Value) -> Message {
    let response = raw.get("response").unwrap_or(&Value::Null);
    Message::ControlResponse(ControlResponse {
        request_id: str_field(response, "request_id"),
        subtype: str_field(response, "subtype").unwrap_or_default(),
        error: str_field(response, "error"),
    })
}

fn parse_result(raw: &Value) -> Message {
    let subtype = match raw.get("subtype").and_then(|v| v.as_str()) {
        Some("success") | None => ResultSubtype::Success,
        Some("error") => ResultSubtype::Error,
        Some(other) => ResultSubtype::Unknown(other.to_string()),
    };

    let errors = raw
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| e.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Message::Result(SessionResult {
        subtype,
        is_error: raw
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        session_id: str_field(raw, "session_id").unwrap_or_default(),
        duration_ms: raw.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        num_turns: raw
            .get("num_turns")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        cost_usd: raw.get("total_cost_usd").and_then(Value::as_f64),
        usage: parse_usage(raw.get("usage")),
        errors,
    })
}

fn parse_tool_progress(raw: &Value) -> Result<Message> {
    Ok(Message::ToolProgress(ToolProgress {
        tool_use_id: required_str(raw, "tool_use_id")?,
        tool_name: str_field(raw, "tool_name").unwrap_or_default(),
        elapsed_secs: raw
            .get("elapsed_time_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    }))
}
