//! Agent CLI process connector.
//!
//! Spawns the `claude` binary in stream-json mode; its stdout and stdin become
//! the upstream connection.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use agentmux_core::config::{PermissionStrategy, UpstreamConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{ConnectContext, UpstreamConnection, UpstreamConnector, UpstreamError};

/// How to launch the agent process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Path to the `claude` binary.
    pub claude_bin: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub model: Option<String>,
    pub permission_strategy: PermissionStrategy,
    /// Grace period after SIGINT before the process is killed.
    pub terminate_timeout: Duration,
}

impl From<&UpstreamConfig> for ProcessConfig {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            claude_bin: config.claude_bin.clone(),
            working_directory: config.working_directory.clone(),
            model: config.model.clone(),
            permission_strategy: config.permission_strategy,
            terminate_timeout: Duration::from_secs(config.terminate_timeout_secs),
        }
    }
}

/// Connector that owns at most one agent child process.
#[derive(Debug)]
pub struct ProcessConnector {
    config: ProcessConfig,
    child: Mutex<Option<Child>>,
}

impl ProcessConnector {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    fn working_dir(&self) -> PathBuf {
        match &self.config.working_directory {
            Some(dir) if dir.exists() => dir.clone(),
            requested => {
                let fallback = dirs::home_dir().unwrap_or_else(|| {
                    warn!("dirs::home_dir() returned None; falling back to temp_dir");
                    std::env::temp_dir()
                });
                if let Some(dir) = requested {
                    warn!(
                        requested = %dir.display(),
                        fallback = %fallback.display(),
                        "Working directory missing, using fallback"
                    );
                }
                fallback
            }
        }
    }

    fn build_command(&self, ctx: &ConnectContext) -> Command {
        let mut cmd = Command::new(&self.config.claude_bin);
        cmd.current_dir(self.working_dir())
            .args(["--output-format", "stream-json"])
            .args(["--input-format", "stream-json"])
            .arg("--verbose")
            .arg("--include-partial-messages")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Keep essential env vars even under a stripped service environment.
        for key in ["HOME", "PATH", "ANTHROPIC_API_KEY"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        match self.config.permission_strategy {
            PermissionStrategy::PromptToolStdio => {
                cmd.args(["--permission-prompt-tool", "stdio"]);
            }
            PermissionStrategy::SkipPermissions => {
                cmd.arg("--dangerously-skip-permissions");
            }
        }
        if let Some(model) = ctx.model.as_ref().or(self.config.model.as_ref()) {
            cmd.args(["--model", model.as_str()]);
        }
        if let Some(session) = &ctx.resume_session {
            cmd.args(["--resume", session.as_str()]);
        }
        cmd
    }
}

impl UpstreamConnector for ProcessConnector {
    async fn connect(&self, ctx: &ConnectContext) -> Result<UpstreamConnection, UpstreamError> {
        // A previous child that outlived its stdout is replaced.
        self.disconnect().await;

        info!(
            claude_bin = %self.config.claude_bin.display(),
            resume_session = ?ctx.resume_session,
            model = ?ctx.model.as_ref().or(self.config.model.as_ref()),
            "Spawning agent process"
        );
        let mut child = self
            .build_command(ctx)
            .spawn()
            .map_err(|e| UpstreamError::SpawnFailed {
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or(UpstreamError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(UpstreamError::MissingPipe("stdout"))?;
        let pid = child.id().unwrap_or_default();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(pid, "stderr: {}", line);
                }
                debug!(pid, "stderr reader finished");
            });
        }

        *self.child.lock().await = Some(child);
        Ok(UpstreamConnection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            label: format!("agent process {pid}"),
        })
    }

    async fn disconnect(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            terminate(&mut child, self.config.terminate_timeout).await;
        }
    }
}

/// SIGINT, then SIGKILL once `timeout` elapses.
async fn terminate(child: &mut Child, timeout: Duration) {
    let pid = child.id();
    debug!(?pid, "Terminating agent process");

    #[cfg(unix)]
    {
        if let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            // SAFETY: pid comes from our own Child handle, which has not been
            // reaped yet. kill(2) with SIGINT has no memory-safety requirements.
            #[allow(unsafe_code)]
            let ret = unsafe { libc::kill(pid, libc::SIGINT) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGINT");
            }
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => info!(?pid, ?status, "Agent process exited"),
        Ok(Err(e)) => {
            warn!(?pid, error = %e, "Error waiting for agent process");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!(?pid, "Timeout waiting for graceful shutdown, killing");
            child.kill().await.ok();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn connector(strategy: PermissionStrategy, model: Option<&str>) -> ProcessConnector {
        ProcessConnector::new(ProcessConfig {
            claude_bin: PathBuf::from("claude"),
            working_directory: Some(std::env::temp_dir()),
            model: model.map(String::from),
            permission_strategy: strategy,
            terminate_timeout: Duration::from_secs(1),
        })
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn stream_json_flags_always_present() {
        let cmd = connector(PermissionStrategy::PromptToolStdio, None)
            .build_command(&ConnectContext::default());
        let args = args(&cmd);
        assert_eq!(&args[..4], [
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json"
        ]);
        assert!(args.contains(&"--include-partial-messages".to_string()));
        assert!(args.windows(2).any(|w| w == ["--permission-prompt-tool", "stdio"]));
        assert!(!args.contains(&"--resume".to_string()));
        assert_eq!(cmd.as_std().get_program(), OsStr::new("claude"));
    }

    #[test]
    fn resume_and_model_are_passed() {
        let cmd = connector(PermissionStrategy::SkipPermissions, Some("opus"))
            .build_command(&ConnectContext {
                resume_session: Some("S1".into()),
                model: None,
            });
        let args = args(&cmd);
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(args.windows(2).any(|w| w == ["--resume", "S1"]));
    }

    #[test]
    fn session_model_overrides_configured_model() {
        let cmd = connector(PermissionStrategy::SkipPermissions, Some("opus"))
            .build_command(&ConnectContext {
                resume_session: Some("S1".into()),
                model: Some("sonnet".into()),
            });
        let args = args(&cmd);
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert!(!args.contains(&"opus".to_string()));
    }

    #[test]
    fn missing_working_dir_falls_back() {
        let connector = ProcessConnector::new(ProcessConfig {
            working_directory: Some(PathBuf::from("/definitely/not/here")),
            ..ProcessConfig::from(&UpstreamConfig::default())
        });
        assert_ne!(connector.working_dir(), PathBuf::from("/definitely/not/here"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let connector = ProcessConnector::new(ProcessConfig {
            claude_bin: PathBuf::from("/nonexistent/agentmux-test-binary"),
            ..ProcessConfig::from(&UpstreamConfig::default())
        });
        let err = connector.connect(&ConnectContext::default()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::SpawnFailed { .. }));
        connector.disconnect().await;
    }
}
