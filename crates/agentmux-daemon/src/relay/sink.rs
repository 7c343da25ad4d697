//! Upstream command sink.
//!
//! A single writer task owns the upstream write half, so frames from
//! concurrent callers never interleave. Interrupts travel on a separate
//! priority channel that the writer always drains first. A command whose
//! write fails is held and written first to the next attached writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agentmux_core::config::OutboundPolicy;
use agentmux_core::ndjson::UpstreamCommand;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Write half of an upstream connection.
pub type UpstreamWriter = Box<dyn AsyncWrite + Send + Unpin>;

const PRIORITY_CAPACITY: usize = 8;

enum SinkControl {
    Attach(UpstreamWriter),
    Detach,
}

/// Errors from [`CommandSink::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Upstream is disconnected")]
    UpstreamDisconnected,

    #[error("Outbound queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Command sink is closed")]
    Closed,
}

impl SinkError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UpstreamDisconnected => "upstream_disconnected",
            Self::QueueFull { .. } => "queue_full",
            Self::Closed => "relay_closed",
        }
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct CommandSink {
    normal_tx: mpsc::Sender<UpstreamCommand>,
    priority_tx: mpsc::Sender<UpstreamCommand>,
    control_tx: mpsc::Sender<SinkControl>,
    connected: Arc<AtomicBool>,
    policy: OutboundPolicy,
    capacity: usize,
}

impl std::fmt::Debug for CommandSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSink")
            .field("connected", &self.is_connected())
            .field("policy", &self.policy)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl CommandSink {
    /// Spawn the writer task. It exits once every handle is dropped.
    pub fn spawn(policy: OutboundPolicy, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let capacity = queue_capacity.max(1);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(4);
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_writer(
            control_rx,
            priority_rx,
            normal_rx,
            Arc::clone(&connected),
        ));

        (
            Self {
                normal_tx,
                priority_tx,
                control_tx,
                connected,
                policy,
                capacity,
            },
            task,
        )
    }

    /// Queue a command for the upstream without waiting for the write.
    pub fn send(&self, command: UpstreamCommand) -> Result<(), SinkError> {
        let connected = self.is_connected();
        let kind = command.kind();
        let result = if command.is_priority() {
            // An interrupt for a process that is gone has nothing to cancel.
            if !connected {
                return Err(SinkError::UpstreamDisconnected);
            }
            self.priority_tx.try_send(command)
        } else {
            if !connected && self.policy == OutboundPolicy::Reject {
                return Err(SinkError::UpstreamDisconnected);
            }
            self.normal_tx.try_send(command)
        };

        match result {
            Ok(()) => {
                debug!(kind, connected, "Upstream command queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(kind, "Outbound queue full, command rejected");
                Err(SinkError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    /// Hand a freshly connected write half to the writer task.
    pub async fn attach(&self, writer: UpstreamWriter) {
        self.connected.store(true, Ordering::Release);
        if self.control_tx.send(SinkControl::Attach(writer)).await.is_err() {
            self.connected.store(false, Ordering::Release);
        }
    }

    /// Drop the current write half; queued commands wait for the next attach.
    pub async fn detach(&self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.control_tx.send(SinkControl::Detach).await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

async fn run_writer(
    mut control_rx: mpsc::Receiver<SinkControl>,
    mut priority_rx: mpsc::Receiver<UpstreamCommand>,
    mut normal_rx: mpsc::Receiver<UpstreamCommand>,
    connected: Arc<AtomicBool>,
) {
    let mut writer: Option<UpstreamWriter> = None;
    let mut held: Option<UpstreamCommand> = None;

    loop {
        let command = match held.take() {
            Some(cmd) if writer.is_some() => cmd,
            waiting => {
                held = waiting;
                tokio::select! {
                    biased;
                    control = control_rx.recv() => {
                        match control {
                            Some(SinkControl::Attach(w)) => {
                                info!(held = held.is_some(), "Upstream writer attached");
                                writer = Some(w);
                            }
                            Some(SinkControl::Detach) => {
                                if writer.take().is_some() {
                                    info!("Upstream writer detached");
                                }
                            }
                            None => break,
                        }
                        continue;
                    }
                    Some(cmd) = priority_rx.recv(), if writer.is_some() => cmd,
                    Some(cmd) = normal_rx.recv(), if writer.is_some() => cmd,
                }
            }
        };

        let Some(w) = writer.as_mut() else {
            held = Some(command);
            continue;
        };
        let kind = command.kind();
        match write_line(w, &command.to_line()).await {
            Ok(()) => debug!(kind, "Upstream command written"),
            Err(e) => {
                writer = None;
                connected.store(false, Ordering::Release);
                // An interrupt must not reach the next process and cancel its
                // first turn.
                if command.is_priority() {
                    warn!(kind, error = %e, "Upstream write failed, interrupt dropped");
                } else {
                    warn!(kind, error = %e, "Upstream write failed, command held for next writer");
                    held = Some(command);
                }
            }
        }
    }
    debug!("Command sink stopped");
}

/// Write one frame and its newline in a single call, then flush.
async fn write_line(writer: &mut UpstreamWriter, line: &str) -> std::io::Result<()> {
    let mut frame = String::with_capacity(line.len() + 1);
    frame.push_str(line);
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}
