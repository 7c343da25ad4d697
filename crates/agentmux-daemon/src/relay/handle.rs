use agentmux_core::command::ClientCommand;
use agentmux_core::event::{SessionSnapshot, UpstreamState};
use agentmux_core::ndjson::UpstreamCommand;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::session::Subscription;

use super::sink::CommandSink;
use super::types::{CommandOutcome, RelayError, RelayMessage, RelayStats, SubscribeRequest};

/// Cloneable handle to a running [`SessionRelay`](super::SessionRelay).
///
/// Every call is a message to the relay actor, except interrupts, which go
/// straight to the command sink's priority lane.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayMessage>,
    sink: CommandSink,
}

impl RelayHandle {
    pub(crate) const fn new(tx: mpsc::Sender<RelayMessage>, sink: CommandSink) -> Self {
        Self { tx, sink }
    }

    /// Feed one raw upstream line. Lines are processed in call order.
    pub async fn upstream_line(&self, line: String) -> Result<(), RelayError> {
        self.send(RelayMessage::UpstreamLine(line)).await
    }

    /// Report an upstream connectivity transition.
    pub async fn upstream_state(
        &self,
        state: UpstreamState,
        message: impl Into<String>,
    ) -> Result<(), RelayError> {
        self.send(RelayMessage::UpstreamState {
            state,
            message: message.into(),
        })
        .await
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayMessage::Subscribe { request, reply }).await?;
        Ok(rx.await.map_err(|_| RelayError::ActorGone)??)
    }

    /// Remove a subscriber. A no-op once the relay has stopped.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let _ = self
            .send(RelayMessage::Unsubscribe {
                subscriber_id: subscriber_id.to_string(),
                registration: None,
            })
            .await;
    }

    /// Remove a subscriber unless its id has since been re-registered.
    pub async fn release(&self, subscriber_id: &str, registration: u64) {
        let _ = self
            .send(RelayMessage::Unsubscribe {
                subscriber_id: subscriber_id.to_string(),
                registration: Some(registration),
            })
            .await;
    }

    /// Submit a command on behalf of a subscriber.
    pub async fn submit(
        &self,
        subscriber_id: &str,
        command: ClientCommand,
    ) -> Result<CommandOutcome, RelayError> {
        if matches!(command, ClientCommand::Interrupt) {
            info!(subscriber_id, "Interrupt requested");
            self.sink.send(interrupt_command())?;
            return Ok(CommandOutcome::Accepted);
        }

        let (reply, rx) = oneshot::channel();
        self.send(RelayMessage::Submit {
            subscriber_id: subscriber_id.to_string(),
            command,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::ActorGone)?
    }

    /// Current snapshot and the sequence number it reflects.
    pub async fn snapshot(&self) -> Result<(u64, SessionSnapshot), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayMessage::Snapshot { reply }).await?;
        rx.await.map_err(|_| RelayError::ActorGone)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayMessage::Stats { reply }).await?;
        rx.await.map_err(|_| RelayError::ActorGone)
    }

    /// Stop the relay; every subscriber stream ends.
    pub async fn shutdown(&self) {
        let _ = self.send(RelayMessage::Shutdown).await;
    }

    pub const fn sink(&self) -> &CommandSink {
        &self.sink
    }

    async fn send(&self, msg: RelayMessage) -> Result<(), RelayError> {
        self.tx.send(msg).await.map_err(|_| RelayError::ActorGone)
    }
}

pub(crate) fn interrupt_command() -> UpstreamCommand {
    UpstreamCommand::Interrupt {
        request_id: new_request_id(),
    }
}

pub(crate) fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
