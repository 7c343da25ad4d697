//! Newline-delimited JSON framing between the relay and its subscribers.
//!
//! A client opens with one [`Hello`] line, then sends
//! [`ClientCommand`](crate::command::ClientCommand) lines. The relay answers
//! with [`ServerFrame`] lines.

use serde::{Deserialize, Serialize};

use crate::event::{SequencedEvent, SessionSnapshot};

/// Where a (re)connecting subscriber wants delivery to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeFrom {
    /// Replay every retained event with a sequence number greater than this.
    Sequence(u64),
    /// Start from the current snapshot, then live events.
    Snapshot,
}

/// First line sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hello {
    /// Stable id across reconnects; generated by the relay when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_type: Option<String>,
    /// Last sequence number the client has applied.
    #[serde(default)]
    pub last_seq: Option<u64>,
    /// Request a full snapshot instead of incremental replay.
    #[serde(default)]
    pub snapshot: bool,
}

impl Hello {
    pub const fn resume_from(&self) -> ResumeFrom {
        if self.snapshot {
            ResumeFrom::Snapshot
        } else {
            match self.last_seq {
                Some(seq) => ResumeFrom::Sequence(seq),
                None => ResumeFrom::Sequence(0),
            }
        }
    }
}

/// Lines sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        subscriber_id: String,
        /// Sequence number the client is caught up to once replay finishes.
        seq: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<SessionSnapshot>,
    },
    /// Incremental replay is impossible; reconnect with `snapshot: true`.
    ResyncRequired {
        requested: u64,
        oldest_available: u64,
        current: u64,
    },
    Event(SequencedEvent),
    Snapshot {
        seq: u64,
        snapshot: SessionSnapshot,
    },
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{AgentStatus, LogicalEvent, StatusChange};

    #[test]
    fn hello_defaults_to_full_replay() {
        let hello: Hello = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(hello.resume_from(), ResumeFrom::Sequence(0));

        let hello: Hello = serde_json::from_str(r#"{"last_seq":12}"#).unwrap();
        assert_eq!(hello.resume_from(), ResumeFrom::Sequence(12));

        let hello: Hello = serde_json::from_str(r#"{"last_seq":12,"snapshot":true}"#).unwrap();
        assert_eq!(hello.resume_from(), ResumeFrom::Snapshot);
    }

    #[test]
    fn event_frame_is_flat() {
        let frame = ServerFrame::Event(SequencedEvent {
            seq: 3,
            timestamp_ms: 10,
            event: LogicalEvent::StatusChange(StatusChange {
                status: AgentStatus::Running,
            }),
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["event"]["type"], "status_change");
    }
}
