//! Folds decoded upstream frames into logical events.
//!
//! Streaming content arrives as `content_block_start` / `content_block_delta`
//! / `content_block_stop` triples keyed by block index, framed by
//! `message_start` and `message_stop`. Each block moves through
//! `Absent -> Open -> Closed`; `message_stop` folds every block of the message
//! into one [`MessageComplete`]. Deltas are forwarded immediately as
//! [`StreamDelta`] events for live rendering.

use std::collections::{BTreeMap, VecDeque};

use agentmux_core::event::{
    AgentStatus, BlockKind, CompletedBlock, ErrorCode, LogicalEvent, MessageComplete,
    ResultSummary, Role, SessionInit, SessionPatch, StatusChange, StreamDelta,
    ToolProgress as ToolProgressEvent,
};
use agentmux_core::ndjson::{
    AssistantMessage, BlockStart, BlockType, ContentBlock, Delta, Message, ResultSubtype,
    SessionResult, StreamEventType, SystemInit, UserMessage,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Message ids remembered to suppress the `assistant` echo of a streamed message.
const RECENT_MESSAGE_IDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Open,
    Closed,
}

#[derive(Debug)]
struct BlockAccumulator {
    kind: BlockKind,
    block_type: String,
    tool_use_id: Option<String>,
    tool_name: Option<String>,
    content: String,
    state: BlockState,
}

impl BlockAccumulator {
    fn open(start: BlockStart) -> Self {
        let (kind, block_type) = match start.block_type {
            BlockType::Text => (BlockKind::Text, "text".to_string()),
            BlockType::ToolUse => (BlockKind::ToolUse, "tool_use".to_string()),
            BlockType::Thinking => (BlockKind::Thinking, "thinking".to_string()),
            BlockType::Other(other) => (BlockKind::Other, other),
        };
        Self {
            kind,
            block_type,
            tool_use_id: start.tool_use_id,
            tool_name: start.name,
            content: start.initial,
            state: BlockState::Open,
        }
    }

    fn finish(self) -> CompletedBlock {
        match self.kind {
            BlockKind::Text => CompletedBlock::Text { text: self.content },
            BlockKind::Thinking => CompletedBlock::Thinking {
                thinking: self.content,
            },
            BlockKind::ToolUse => CompletedBlock::ToolUse {
                id: self.tool_use_id.unwrap_or_default(),
                name: self.tool_name.unwrap_or_default(),
                input: parse_tool_input(&self.content),
            },
            BlockKind::Other => CompletedBlock::Other {
                block_type: self.block_type,
                content: self.content,
            },
        }
    }
}

/// The message currently being streamed.
#[derive(Debug, Default)]
struct MessageAccumulator {
    message_id: Option<String>,
    blocks: BTreeMap<u32, BlockAccumulator>,
    stop_reason: Option<String>,
}

/// Stateful stream-json to [`LogicalEvent`] converter.
///
/// Permission traffic (`control_request`, `control_cancel_request`) and
/// keep-alives are handled by the relay; everything else goes through
/// [`Reassembler::convert`].
#[derive(Debug)]
pub struct Reassembler {
    current: Option<MessageAccumulator>,
    recent_ids: VecDeque<String>,
    context_window_tokens: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(200_000)
    }
}

impl Reassembler {
    pub const fn new(context_window_tokens: u64) -> Self {
        Self {
            current: None,
            recent_ids: VecDeque::new(),
            context_window_tokens,
        }
    }

    /// Convert one decoded frame. Returns a vector because some frames produce
    /// several events and streaming bookkeeping frames produce none.
    pub fn convert(&mut self, msg: Message) -> Vec<LogicalEvent> {
        match msg {
            Message::SystemInit(init) => vec![session_init(init)],
            Message::SystemStatus(status) => {
                let status = if status.status.as_deref() == Some("compacting") {
                    AgentStatus::Compacting
                } else {
                    AgentStatus::Running
                };
                vec![LogicalEvent::StatusChange(StatusChange { status })]
            }
            Message::Assistant(assistant) => self.handle_assistant(assistant),
            Message::User(user) => handle_user(user),
            Message::StreamEvent(stream) => self.handle_stream_event(stream.event_type),
            Message::Result(result) => self.handle_result(result),
            Message::ToolProgress(p) => vec![LogicalEvent::ToolProgress(ToolProgressEvent {
                tool_use_id: p.tool_use_id,
                tool_name: p.tool_name,
                elapsed_secs: p.elapsed_secs,
            })],
            Message::Unknown { msg_type, payload } => {
                debug!(msg_type, "Forwarding unknown frame type");
                vec![LogicalEvent::Unknown {
                    tag: msg_type,
                    payload,
                }]
            }
            Message::ControlRequest(_)
            | Message::ControlCancel { .. }
            | Message::ControlResponse(_)
            | Message::KeepAlive => {
                debug!(kind = msg.kind(), "Frame not handled by reassembler");
                vec![]
            }
        }
    }

    /// Whether a message is currently being streamed.
    pub const fn in_message(&self) -> bool {
        self.current.is_some()
    }

    /// Discard any half-assembled message (upstream went away mid-turn).
    pub fn abort(&mut self, reason: &str) -> Option<LogicalEvent> {
        let partial = self.current.take()?;
        warn!(
            message_id = ?partial.message_id,
            blocks = partial.blocks.len(),
            reason,
            "Discarding partially streamed message"
        );
        Some(LogicalEvent::error(
            ErrorCode::StreamInterrupted,
            format!("message interrupted: {reason}"),
        ))
    }

    fn handle_assistant(&mut self, msg: AssistantMessage) -> Vec<LogicalEvent> {
        if self.is_streamed(msg.id.as_deref()) {
            debug!(message_id = ?msg.id, "Dropping assistant echo of streamed message");
            return vec![];
        }
        let blocks = msg
            .content
            .into_iter()
            .map(|block| match block {
                ContentBlock::Text { text } => CompletedBlock::Text { text },
                ContentBlock::ToolUse { id, name, input } => {
                    CompletedBlock::ToolUse { id, name, input }
                }
                ContentBlock::Thinking { thinking } => CompletedBlock::Thinking { thinking },
            })
            .collect();
        vec![
            running(),
            LogicalEvent::MessageComplete(MessageComplete {
                message_id: msg.id,
                role: Role::Assistant,
                blocks,
                stop_reason: Some(msg.stop_reason.as_str().to_string()),
            }),
        ]
    }

    fn is_streamed(&self, id: Option<&str>) -> bool {
        if let Some(current) = &self.current {
            // Partial-message mode echoes each block as a full `assistant`
            // frame before `message_stop`.
            if current.message_id.is_none() || current.message_id.as_deref() == id {
                return true;
            }
        }
        id.is_some_and(|id| self.recent_ids.iter().any(|seen| seen == id))
    }

    fn remember(&mut self, id: String) {
        if self.recent_ids.len() >= RECENT_MESSAGE_IDS {
            self.recent_ids.pop_front();
        }
        self.recent_ids.push_back(id);
    }

    fn handle_stream_event(&mut self, event: StreamEventType) -> Vec<LogicalEvent> {
        match event {
            StreamEventType::MessageStart { message_id } => {
                let mut events = Vec::new();
                if let Some(stale) = self.current.take() {
                    events.push(violation(format!(
                        "message_start while message {:?} is still open",
                        stale.message_id
                    )));
                }
                self.current = Some(MessageAccumulator {
                    message_id,
                    ..Default::default()
                });
                events.push(running());
                events
            }
            StreamEventType::ContentBlockStart { index, block } => self.block_start(index, block),
            StreamEventType::ContentBlockDelta { index, delta } => self.block_delta(index, delta),
            StreamEventType::ContentBlockStop { index } => self.block_stop(index),
            StreamEventType::MessageDelta { stop_reason } => {
                match self.current.as_mut() {
                    Some(current) => current.stop_reason = stop_reason,
                    None => debug!("message_delta outside of a message"),
                }
                vec![]
            }
            StreamEventType::MessageStop => self.message_stop(),
            StreamEventType::Unknown(payload) => vec![LogicalEvent::Unknown {
                tag: "stream_event".to_string(),
                payload,
            }],
        }
    }

    fn block_start(&mut self, index: u32, block: BlockStart) -> Vec<LogicalEvent> {
        let mut events = Vec::new();
        if self.current.is_none() {
            events.push(running());
        }
        let current = self.current.get_or_insert_with(MessageAccumulator::default);

        if current.blocks.contains_key(&index) {
            events.push(violation(format!(
                "content_block_start for already used index {index}"
            )));
            return events;
        }

        let acc = BlockAccumulator::open(block);
        events.push(LogicalEvent::StreamDelta(StreamDelta {
            message_id: current.message_id.clone(),
            index,
            kind: acc.kind,
            delta: acc.content.clone(),
            tool_name: acc.tool_name.clone(),
        }));
        current.blocks.insert(index, acc);
        events
    }

    fn block_delta(&mut self, index: u32, delta: Delta) -> Vec<LogicalEvent> {
        let Some(current) = self.current.as_mut() else {
            return vec![violation(format!(
                "content_block_delta for index {index} outside of a message"
            ))];
        };
        let Some(acc) = current
            .blocks
            .get_mut(&index)
            .filter(|acc| acc.state == BlockState::Open)
        else {
            return vec![violation(format!(
                "content_block_delta for index {index} with no open block"
            ))];
        };

        let text = match delta {
            Delta::Text(t) | Delta::InputJson(t) | Delta::Thinking(t) => t,
            Delta::Signature(_) => return vec![],
            Delta::Unknown(raw) => {
                debug!(index, delta = %raw, "Ignoring unknown delta type");
                return vec![];
            }
        };
        acc.content.push_str(&text);
        vec![LogicalEvent::StreamDelta(StreamDelta {
            message_id: current.message_id.clone(),
            index,
            kind: acc.kind,
            delta: text,
            tool_name: acc.tool_name.clone(),
        })]
    }

    fn block_stop(&mut self, index: u32) -> Vec<LogicalEvent> {
        let acc = self
            .current
            .as_mut()
            .and_then(|current| current.blocks.get_mut(&index))
            .filter(|acc| acc.state == BlockState::Open);
        match acc {
            Some(acc) => {
                acc.state = BlockState::Closed;
                vec![]
            }
            None => vec![violation(format!(
                "content_block_stop for index {index} with no open block"
            ))],
        }
    }

    fn message_stop(&mut self) -> Vec<LogicalEvent> {
        let Some(current) = self.current.take() else {
            return vec![violation("message_stop outside of a message".to_string())];
        };

        let still_open: Vec<u32> = current
            .blocks
            .iter()
            .filter(|(_, acc)| acc.state == BlockState::Open)
            .map(|(index, _)| *index)
            .collect();
        if !still_open.is_empty() {
            warn!(
                message_id = ?current.message_id,
                indices = ?still_open,
                "message_stop with unterminated blocks, finalizing them"
            );
        }

        if let Some(id) = &current.message_id {
            self.remember(id.clone());
        }

        vec![LogicalEvent::MessageComplete(MessageComplete {
            message_id: current.message_id,
            role: Role::Assistant,
            blocks: current
                .blocks
                .into_values()
                .map(BlockAccumulator::finish)
                .collect(),
            stop_reason: current.stop_reason,
        })]
    }

    fn handle_result(&mut self, result: SessionResult) -> Vec<LogicalEvent> {
        let mut events = Vec::new();
        if let Some(interrupted) = self.abort("turn ended before message_stop") {
            events.push(interrupted);
        }

        // `is_error` alone is unreliable: a success subtype with no error
        // messages is not a failed turn.
        let has_real_error = result.is_error
            && (result.subtype != ResultSubtype::Success || !result.errors.is_empty());
        if has_real_error {
            let message = if result.errors.is_empty() {
                format!("agent turn failed (subtype: {})", result.subtype.as_str())
            } else {
                result.errors.join("; ")
            };
            warn!(errors = ?result.errors, "Agent result indicates error");
            events.push(LogicalEvent::error(ErrorCode::SessionError, message));
        } else if result.is_error {
            warn!(
                subtype = result.subtype.as_str(),
                "Result has is_error=true but subtype=success with no errors, ignoring"
            );
        }

        let context_tokens = result.usage.context_tokens();
        events.push(LogicalEvent::ResultSummary(ResultSummary {
            subtype: result.subtype.as_str().to_string(),
            is_error: has_real_error,
            duration_ms: result.duration_ms,
            num_turns: result.num_turns,
            cost_usd: result.cost_usd,
            usage: result.usage,
            errors: result.errors,
        }));
        events.push(LogicalEvent::StatusChange(StatusChange {
            status: AgentStatus::Idle,
        }));
        if context_tokens > 0 && self.context_window_tokens > 0 {
            events.push(LogicalEvent::SessionPatch(SessionPatch {
                context_usage_percent: Some(usage_percent(
                    context_tokens,
                    self.context_window_tokens,
                )),
                ..Default::default()
            }));
        }
        events
    }
}

fn session_init(init: SystemInit) -> LogicalEvent {
    LogicalEvent::SessionInit(SessionInit {
        session_id: init.session_id,
        model: init.model,
        cwd: init.cwd.to_string_lossy().into_owned(),
        tools: init.tools,
        permission_mode: init.permission_mode,
        mcp_servers: init.mcp_servers,
    })
}

fn handle_user(user: UserMessage) -> Vec<LogicalEvent> {
    if user.content.is_empty() {
        return vec![];
    }
    vec![LogicalEvent::MessageComplete(MessageComplete {
        message_id: None,
        role: Role::User,
        blocks: user
            .content
            .into_iter()
            .map(|tr| CompletedBlock::ToolResult {
                tool_use_id: tr.tool_use_id,
                content: tr.content,
                is_error: tr.is_error,
            })
            .collect(),
        stop_reason: None,
    })]
}

const fn running() -> LogicalEvent {
    LogicalEvent::StatusChange(StatusChange {
        status: AgentStatus::Running,
    })
}

fn violation(message: String) -> LogicalEvent {
    warn!(%message, "Stream protocol violation, frame dropped");
    LogicalEvent::error(ErrorCode::ProtocolViolation, message)
}

/// Concatenated `input_json_delta` fragments; kept as a raw string if they do
/// not form valid JSON.
fn parse_tool_input(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "Tool input is not valid JSON, keeping raw text");
        Value::String(raw.to_string())
    })
}

#[allow(clippy::cast_precision_loss)]
fn usage_percent(tokens: u64, window: u64) -> f64 {
    (tokens as f64 / window as f64 * 100.0).min(100.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;
    use agentmux_core::ndjson::parse_line;

    fn feed(r: &mut Reassembler, line: &str) -> Vec<LogicalEvent> {
        r.convert(parse_line(line).unwrap())
    }

    fn stream(event: &str) -> String {
        format!(r#"{{"type":"stream_event","event":{event}}}"#)
    }

    fn block_start_text(index: u32) -> String {
        stream(&format!(
            r#"{{"type":"content_block_start","index":{index},"content_block":{{"type":"text","text":""}}}}"#
        ))
    }

    fn text_delta(index: u32, text: &str) -> String {
        stream(&format!(
            r#"{{"type":"content_block_delta","index":{index},"delta":{{"type":"text_delta","text":"{text}"}}}}"#
        ))
    }

    fn block_stop(index: u32) -> String {
        stream(&format!(r#"{{"type":"content_block_stop","index":{index}}}"#))
    }

    fn message_stop() -> String {
        stream(r#"{"type":"message_stop"}"#)
    }

    fn is_violation(ev: &LogicalEvent) -> bool {
        matches!(ev, LogicalEvent::Error(e) if e.code == ErrorCode::ProtocolViolation)
    }

    #[test]
    fn deltas_concatenate_into_one_message() {
        let mut r = Reassembler::default();
        let start = feed(&mut r, &block_start_text(0));
        // implicit message start announces Running, then the block itself
        assert_eq!(start.len(), 2);
        assert!(matches!(start[1], LogicalEvent::StreamDelta(ref d) if d.delta.is_empty()));

        let d1 = feed(&mut r, &text_delta(0, "Hi"));
        let d2 = feed(&mut r, &text_delta(0, " there"));
        assert!(matches!(&d1[..], [LogicalEvent::StreamDelta(d)] if d.delta == "Hi"));
        assert!(matches!(&d2[..], [LogicalEvent::StreamDelta(d)] if d.delta == " there"));

        assert!(feed(&mut r, &block_stop(0)).is_empty());

        let done = feed(&mut r, &message_stop());
        assert_eq!(done.len(), 1);
        let LogicalEvent::MessageComplete(msg) = &done[0] else {
            panic!("expected MessageComplete, got {:?}", done[0]);
        };
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(
            msg.blocks,
            vec![CompletedBlock::Text {
                text: "Hi there".into()
            }]
        );
        assert!(!r.in_message());
    }

    #[test]
    fn blocks_are_ordered_by_index_not_completion() {
        let mut r = Reassembler::default();
        feed(&mut r, &stream(r#"{"type":"message_start","message":{"id":"msg_1"}}"#));
        feed(&mut r, &block_start_text(1));
        feed(&mut r, &block_start_text(0));
        feed(&mut r, &text_delta(1, "second"));
        feed(&mut r, &text_delta(0, "first"));
        feed(&mut r, &block_stop(1));
        feed(&mut r, &block_stop(0));
        let done = feed(&mut r, &message_stop());

        let LogicalEvent::MessageComplete(msg) = &done[0] else {
            panic!("expected MessageComplete");
        };
        assert_eq!(msg.message_id.as_deref(), Some("msg_1"));
        assert_eq!(
            msg.blocks,
            vec![
                CompletedBlock::Text {
                    text: "first".into()
                },
                CompletedBlock::Text {
                    text: "second".into()
                },
            ]
        );
    }

    #[test]
    fn tool_use_input_is_parsed_from_partial_json() {
        let mut r = Reassembler::default();
        feed(
            &mut r,
            &stream(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"Bash","input":{}}}"#,
            ),
        );
        feed(
            &mut r,
            &stream(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"command\":"}}"#,
            ),
        );
        feed(
            &mut r,
            &stream(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"ls\"}"}}"#,
            ),
        );
        feed(&mut r, &block_stop(0));
        let done = feed(&mut r, &message_stop());

        let LogicalEvent::MessageComplete(msg) = &done[0] else {
            panic!("expected MessageComplete");
        };
        assert_eq!(
            msg.blocks,
            vec![CompletedBlock::ToolUse {
                id: "toolu_1".into(),
                name: "Bash".into(),
                input: serde_json::json!({"command": "ls"}),
            }]
        );
    }

    #[test]
    fn orphan_delta_is_a_violation_and_does_not_open_block() {
        let mut r = Reassembler::default();
        let events = feed(&mut r, &text_delta(3, "lost"));
        assert_eq!(events.len(), 1);
        assert!(is_violation(&events[0]));
        assert!(!r.in_message());

        feed(&mut r, &block_start_text(0));
        let events = feed(&mut r, &text_delta(1, "wrong index"));
        assert!(is_violation(&events[0]));
    }

    #[test]
    fn delta_after_stop_is_rejected() {
        let mut r = Reassembler::default();
        feed(&mut r, &block_start_text(0));
        feed(&mut r, &text_delta(0, "a"));
        feed(&mut r, &block_stop(0));

        let events = feed(&mut r, &text_delta(0, "b"));
        assert!(is_violation(&events[0]));
        let events = feed(&mut r, &block_stop(0));
        assert!(is_violation(&events[0]));
        let events = feed(&mut r, &block_start_text(0));
        assert!(is_violation(&events[0]));

        let done = feed(&mut r, &message_stop());
        let LogicalEvent::MessageComplete(msg) = &done[0] else {
            panic!("expected MessageComplete");
        };
        assert_eq!(msg.blocks, vec![CompletedBlock::Text { text: "a".into() }]);
    }

    #[test]
    fn orphan_message_stop_is_a_violation() {
        let mut r = Reassembler::default();
        let events = feed(&mut r, &message_stop());
        assert!(is_violation(&events[0]));
    }

    #[test]
    fn assistant_echo_of_streamed_message_is_dropped() {
        let mut r = Reassembler::default();
        feed(&mut r, &stream(r#"{"type":"message_start","message":{"id":"msg_9"}}"#));
        feed(&mut r, &block_start_text(0));
        feed(&mut r, &text_delta(0, "hello"));
        feed(&mut r, &block_stop(0));
        let assistant = r#"{"type":"assistant","message":{"id":"msg_9","content":[{"type":"text","text":"hello"}],"stop_reason":null}}"#;
        assert!(feed(&mut r, assistant).is_empty());
        feed(&mut r, &message_stop());
        // late echo after the stop is still recognised
        assert!(feed(&mut r, assistant).is_empty());
    }

    #[test]
    fn unstreamed_assistant_becomes_message_complete() {
        let mut r = Reassembler::default();
        let events = feed(
            &mut r,
            r#"{"type":"assistant","message":{"id":"msg_2","content":[{"type":"text","text":"done"}],"stop_reason":"end_turn"}}"#,
        );
        assert_eq!(events.len(), 2);
        let LogicalEvent::MessageComplete(msg) = &events[1] else {
            panic!("expected MessageComplete");
        };
        assert_eq!(msg.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(msg.blocks, vec![CompletedBlock::Text { text: "done".into() }]);
    }

    #[test]
    fn tool_results_become_user_messages() {
        let mut r = Reassembler::default();
        let events = feed(
            &mut r,
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"ok","is_error":false}]}}"#,
        );
        let LogicalEvent::MessageComplete(msg) = &events[0] else {
            panic!("expected MessageComplete");
        };
        assert_eq!(msg.role, Role::User);
        assert!(matches!(
            &msg.blocks[0],
            CompletedBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "toolu_1"
        ));
    }

    #[test]
    fn result_emits_summary_idle_and_context_patch() {
        let mut r = Reassembler::new(1000);
        let events = feed(
            &mut r,
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s1","duration_ms":10,"num_turns":1,"total_cost_usd":0.5,"usage":{"input_tokens":200,"output_tokens":5,"cache_read_input_tokens":50}}"#,
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], LogicalEvent::ResultSummary(s) if s.cost_usd == Some(0.5)));
        assert_eq!(
            events[1],
            LogicalEvent::StatusChange(StatusChange {
                status: AgentStatus::Idle
            })
        );
        let LogicalEvent::SessionPatch(patch) = &events[2] else {
            panic!("expected SessionPatch");
        };
        assert_eq!(patch.context_usage_percent, Some(25.0));
    }

    #[test]
    fn result_mid_stream_reports_interruption() {
        let mut r = Reassembler::default();
        feed(&mut r, &block_start_text(0));
        let events = feed(
            &mut r,
            r#"{"type":"result","subtype":"error_during_execution","is_error":true,"session_id":"s1","duration_ms":1,"num_turns":1,"errors":["boom"]}"#,
        );
        assert!(
            matches!(&events[0], LogicalEvent::Error(e) if e.code == ErrorCode::StreamInterrupted)
        );
        assert!(
            matches!(&events[1], LogicalEvent::Error(e) if e.code == ErrorCode::SessionError && e.message == "boom")
        );
        assert!(!r.in_message());
    }

    #[test]
    fn compacting_status() {
        let mut r = Reassembler::default();
        let events = feed(
            &mut r,
            r#"{"type":"system","subtype":"status","status":"compacting"}"#,
        );
        assert_eq!(
            events,
            vec![LogicalEvent::StatusChange(StatusChange {
                status: AgentStatus::Compacting
            })]
        );
    }

    #[test]
    fn unknown_frames_pass_through() {
        let mut r = Reassembler::default();
        let events = feed(&mut r, r#"{"type":"telemetry","x":1}"#);
        assert!(matches!(&events[0], LogicalEvent::Unknown { tag, .. } if tag == "telemetry"));
    }

    #[test]
    fn usage_percent_is_clamped() {
        assert_eq!(usage_percent(300, 200), 100.0);
        assert_eq!(usage_percent(50, 200), 25.0);
    }
}
