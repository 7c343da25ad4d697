//! Configuration resolution for agentmux.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config_dir>/agentmux/settings.json`)
//! 3. Project config (`.agentmux/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files may be partial: they are deep-merged over the lower layers before
//! being deserialized, so `{"relay":{"backlog_capacity":100}}` leaves every
//! other setting at its inherited value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete agentmux configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub permissions: PermissionConfig,
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
}

/// Event relay tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Number of sequenced events retained for replay.
    pub backlog_capacity: usize,
    /// Per-subscriber delivery queue; overflowing it forces a resync.
    pub subscriber_queue_capacity: usize,
    pub max_subscribers: usize,
    /// Upstream silence longer than this is reported as a stale connection.
    pub keepalive_interval_secs: u64,
    /// Context window used to derive `context_usage_percent`.
    pub context_window_tokens: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: 4096,
            subscriber_queue_capacity: 1024,
            max_subscribers: 16,
            keepalive_interval_secs: 30,
            context_window_tokens: 200_000,
        }
    }
}

impl RelayConfig {
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Permission prompt lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Seconds before an unanswered prompt is cancelled.
    pub timeout_secs: u64,
    /// Resolved/cancelled request ids remembered for duplicate detection.
    pub tombstone_capacity: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            tombstone_capacity: 1024,
        }
    }
}

impl PermissionConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the agent process is asked to handle tool permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionStrategy {
    /// Route every prompt through the relay (`--permission-prompt-tool stdio`).
    #[default]
    PromptToolStdio,
    /// `--dangerously-skip-permissions`; only for sandboxed environments.
    SkipPermissions,
}

/// What happens to outbound commands while the upstream is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutboundPolicy {
    /// Hold commands (bounded) and flush them after reconnection.
    #[default]
    Queue,
    /// Fail commands immediately with `UpstreamDisconnected`.
    Reject,
}

/// Upstream agent process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub claude_bin: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub model: Option<String>,
    pub permission_strategy: PermissionStrategy,
    pub outbound_policy: OutboundPolicy,
    pub outbound_queue_capacity: usize,
    /// Seconds to wait for graceful shutdown before SIGKILL.
    pub terminate_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            claude_bin: PathBuf::from("claude"),
            working_directory: None,
            model: None,
            permission_strategy: PermissionStrategy::default(),
            outbound_policy: OutboundPolicy::default(),
            outbound_queue_capacity: 64,
            terminate_timeout_secs: 5,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff for upstream reconnection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Downstream listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut merged, load_config_file(&global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Global settings file, e.g. `~/.config/agentmux/settings.json` on Linux.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agentmux").join("settings.json"))
}

pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".agentmux").join("settings.json")
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`; non-object values replace.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `AGENTMUX_*` overrides; `lookup` abstracts the environment for tests.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("AGENTMUX_BACKLOG_CAPACITY").and_then(|v| v.parse().ok()) {
        config.relay.backlog_capacity = n;
    }
    if let Some(n) = lookup("AGENTMUX_MAX_SUBSCRIBERS").and_then(|v| v.parse().ok()) {
        config.relay.max_subscribers = n;
    }
    if let Some(n) = lookup("AGENTMUX_KEEPALIVE_SECS").and_then(|v| v.parse().ok()) {
        config.relay.keepalive_interval_secs = n;
    }
    if let Some(n) = lookup("AGENTMUX_PERMISSION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.permissions.timeout_secs = n;
    }
    if let Some(val) = lookup("AGENTMUX_CLAUDE_BIN") {
        config.upstream.claude_bin = PathBuf::from(val);
    }
    if let Some(val) = lookup("AGENTMUX_MODEL") {
        config.upstream.model = Some(val);
    }
    if let Some(addr) = lookup("AGENTMUX_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
        config.server.listen_addr = addr;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.relay.backlog_capacity, 4096);
        assert_eq!(config.permissions.timeout(), Duration::from_secs(300));
        assert_eq!(config.upstream.outbound_policy, OutboundPolicy::Queue);
        assert_eq!(config.server.listen_addr.port(), 7878);
    }

    #[test]
    fn partial_project_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"relay":{"backlog_capacity":128},"upstream":{"outbound_policy":"reject"}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.relay.backlog_capacity, 128);
        assert_eq!(config.relay.subscriber_queue_capacity, 1024);
        assert_eq!(config.upstream.outbound_policy, OutboundPolicy::Reject);
        assert_eq!(config.upstream.claude_bin, PathBuf::from("claude"));
    }

    #[test]
    fn invalid_project_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(load_config(Some(dir.path())), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "AGENTMUX_BACKLOG_CAPACITY" => Some("10".into()),
            "AGENTMUX_MODEL" => Some("claude-opus".into()),
            "AGENTMUX_LISTEN_ADDR" => Some("0.0.0.0:9000".into()),
            "AGENTMUX_KEEPALIVE_SECS" => Some("not-a-number".into()),
            _ => None,
        });
        assert_eq!(config.relay.backlog_capacity, 10);
        assert_eq!(config.upstream.model.as_deref(), Some("claude-opus"));
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.relay.keepalive_interval_secs, 30);
    }

    #[test]
    fn merge_replaces_scalars_and_recurses_objects() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge_json(&mut base, serde_json::json!({"a": {"b": 10}, "d": [1]}));
        assert_eq!(base, serde_json::json!({"a": {"b": 10, "c": 2}, "d": [1]}));
    }
}
