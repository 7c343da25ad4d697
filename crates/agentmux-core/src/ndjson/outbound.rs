//! Outbound frames written to the agent's stdin.

use serde_json::{Value, json};

/// A typed frame destined for the upstream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    UserInput {
        content: String,
        session_id: Option<String>,
    },
    PermissionResponse {
        request_id: String,
        allow: bool,
        /// Tool input to run with on allow.
        updated_input: Value,
        message: Option<String>,
    },
    Interrupt {
        request_id: String,
    },
    SetModel {
        request_id: String,
        model: Option<String>,
    },
    SetPermissionMode {
        request_id: String,
        mode: String,
    },
}

impl UpstreamCommand {
    /// Interrupts jump ahead of queued input.
    pub const fn is_priority(&self) -> bool {
        matches!(self, Self::Interrupt { .. })
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UserInput { .. } => "user_input",
            Self::PermissionResponse { .. } => "permission_response",
            Self::Interrupt { .. } => "interrupt",
            Self::SetModel { .. } => "set_model",
            Self::SetPermissionMode { .. } => "set_permission_mode",
        }
    }

    /// Encode as a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }

    fn to_value(&self) -> Value {
        match self {
            Self::UserInput {
                content,
                session_id,
            } => json!({
                "type": "user",
                "message": {
                    "role": "user",
                    "content": content,
                },
                "session_id": session_id.as_deref().unwrap_or("default"),
                "parent_tool_use_id": null,
            }),
            Self::PermissionResponse {
                request_id,
                allow,
                updated_input,
                message,
            } => {
                // The agent validates `updatedInput` as an object; echoing `{}`
                // would wipe the tool arguments, so callers pass the original.
                let response = if *allow {
                    json!({
                        "behavior": "allow",
                        "updatedInput": updated_input,
                    })
                } else {
                    json!({
                        "behavior": "deny",
                        "message": message.as_deref().unwrap_or("User denied permission"),
                    })
                };
                json!({
                    "type": "control_response",
                    "response": {
                        "subtype": "success",
                        "request_id": request_id,
                        "response": response,
                    }
                })
            }
            Self::Interrupt { request_id } => control_request(request_id, json!({
                "subtype": "interrupt",
            })),
            Self::SetModel { request_id, model } => control_request(request_id, json!({
                "subtype": "set_model",
                "model": model,
            })),
            Self::SetPermissionMode { request_id, mode } => {
                control_request(request_id, json!({
                    "subtype": "set_permission_mode",
                    "mode": mode,
                }))
            }
        }
    }
}

fn control_request(request_id: &str, request: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(cmd: &UpstreamCommand) -> Value {
        serde_json::from_str(&cmd.to_line()).unwrap()
    }

    #[test]
    fn user_input_frame() {
        let v = parse(&UpstreamCommand::UserInput {
            content: "hello".into(),
            session_id: Some("s1".into()),
        });
        assert_eq!(v["type"], "user");
        assert_eq!(v["message"]["role"], "user");
        assert_eq!(v["message"]["content"], "hello");
        assert_eq!(v["session_id"], "s1");
        assert!(v["parent_tool_use_id"].is_null());
    }

    #[test]
    fn permission_allow_includes_input() {
        let v = parse(&UpstreamCommand::PermissionResponse {
            request_id: "req_p1".into(),
            allow: true,
            updated_input: json!({"command": "cargo test", "timeout": 30000}),
            message: None,
        });
        assert_eq!(v["type"], "control_response");
        assert_eq!(v["response"]["subtype"], "success");
        assert_eq!(v["response"]["request_id"], "req_p1");
        let response = &v["response"]["response"];
        assert_eq!(response["behavior"], "allow");
        assert_eq!(response["updatedInput"]["command"], "cargo test");
        assert_eq!(response["updatedInput"]["timeout"], 30000);
    }

    #[test]
    fn permission_deny_carries_message() {
        let v = parse(&UpstreamCommand::PermissionResponse {
            request_id: "req_p2".into(),
            allow: false,
            updated_input: json!({"command": "rm -rf /"}),
            message: None,
        });
        let response = &v["response"]["response"];
        assert_eq!(response["behavior"], "deny");
        assert!(response["message"].is_string());
        assert!(response.get("updatedInput").is_none());
    }

    #[test]
    fn control_requests() {
        let v = parse(&UpstreamCommand::Interrupt {
            request_id: "c1".into(),
        });
        assert_eq!(v["type"], "control_request");
        assert_eq!(v["request_id"], "c1");
        assert_eq!(v["request"]["subtype"], "interrupt");

        let v = parse(&UpstreamCommand::SetPermissionMode {
            request_id: "c2".into(),
            mode: "acceptEdits".into(),
        });
        assert_eq!(v["request"]["subtype"], "set_permission_mode");
        assert_eq!(v["request"]["mode"], "acceptEdits");
    }

    #[test]
    fn only_interrupt_is_priority() {
        assert!(
            UpstreamCommand::Interrupt {
                request_id: "x".into()
            }
            .is_priority()
        );
        assert!(
            !UpstreamCommand::SetModel {
                request_id: "x".into(),
                model: None
            }
            .is_priority()
        );
    }
}
