//! Commands submitted by subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Answer to a permission prompt.
///
/// `allow_always` is accepted for client compatibility but behaves exactly
/// like `allow`: no rule is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    #[serde(alias = "allow_always", alias = "allow_once")]
    Allow,
    Deny,
}

impl PermissionDecision {
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// A command a subscriber sends towards the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// New user turn.
    UserInput { content: String },
    /// Answer to an outstanding permission request.
    PermissionResponse {
        request_id: String,
        decision: PermissionDecision,
        /// Replacement tool parameters; the original input is echoed when absent.
        #[serde(default)]
        updated_input: Option<Value>,
        /// Explanation passed to the agent on deny.
        #[serde(default)]
        message: Option<String>,
    },
    /// Cancel the running turn.
    Interrupt,
    /// Switch model; `None` restores the default.
    SetModel {
        #[serde(default)]
        model: Option<String>,
    },
    SetPermissionMode { mode: String },
    /// Ask for the current snapshot (answered to the requester only).
    Snapshot,
}

impl ClientCommand {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UserInput { .. } => "user_input",
            Self::PermissionResponse { .. } => "permission_response",
            Self::Interrupt => "interrupt",
            Self::SetModel { .. } => "set_model",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::Snapshot => "snapshot",
        }
    }
}
