//! Session relay actor: upstream frames in, sequenced events out.
//!
//! Data flow:
//! ```text
//! upstream line → decoder → reassembler / correlator → store → fan-out bus
//! subscriber command → correlator → command sink → upstream
//! ```
//!
//! The actor is the only owner of the store, the bus and the correlator, so
//! sequence assignment and fan-out happen in upstream arrival order without
//! any locking.

use std::collections::HashMap;

use agentmux_core::command::ClientCommand;
use agentmux_core::downstream::ResumeFrom;
use agentmux_core::event::{
    AgentStatus, CancelReason, ConnectionNotice, ErrorCode, LogicalEvent, SessionPatch,
    SessionSnapshot, StatusChange, UpstreamState,
};
use agentmux_core::ndjson::{
    self, ControlRequest, ControlRequestType, ControlResponse, Message, UpstreamCommand,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::permission::{Correlator, OpenRequest};
use crate::session::{FanoutBus, SessionStore, SubscribeError, Subscription};
use crate::stream::Reassembler;

use super::handle::{RelayHandle, interrupt_command, new_request_id};
use super::sink::CommandSink;
use super::types::{
    CommandOutcome, RelayError, RelayMessage, RelayOptions, RelayStats, SubscribeRequest,
};

/// Owns the per-session state and processes the relay mailbox.
pub struct SessionRelay {
    reassembler: Reassembler,
    store: SessionStore,
    bus: FanoutBus,
    correlator: Correlator,
    sink: CommandSink,
    /// Settings changes sent upstream, applied to the snapshot once acknowledged.
    pending_controls: HashMap<String, SessionPatch>,
    upstream_state: UpstreamState,
    mailbox: mpsc::Receiver<RelayMessage>,
}

impl SessionRelay {
    /// Spawn the relay actor.
    pub fn spawn(options: RelayOptions, sink: CommandSink) -> (RelayHandle, JoinHandle<()>) {
        let (tx, mailbox) = mpsc::channel(options.mailbox_capacity.max(1));
        let relay = Self {
            reassembler: Reassembler::new(options.context_window_tokens),
            store: SessionStore::new(options.backlog_capacity),
            bus: FanoutBus::new(options.fanout),
            correlator: Correlator::new(options.correlator),
            sink: sink.clone(),
            pending_controls: HashMap::new(),
            upstream_state: UpstreamState::Disconnected,
            mailbox,
        };
        let task = tokio::spawn(relay.run());
        (RelayHandle::new(tx, sink), task)
    }

    async fn run(mut self) {
        info!("Session relay started");
        loop {
            let deadline = self.correlator.next_deadline();
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(RelayMessage::Shutdown) | None => break,
                    Some(msg) => self.handle(msg),
                },
                () = sleep_until_deadline(deadline) => self.expire_permissions(),
            }
        }
        self.bus.close_all();
        info!(seq = self.store.current_seq(), "Session relay stopped");
    }

    fn handle(&mut self, msg: RelayMessage) {
        match msg {
            RelayMessage::UpstreamLine(line) => self.on_upstream_line(&line),
            RelayMessage::UpstreamState { state, message } => {
                self.on_upstream_state(state, message);
            }
            RelayMessage::Subscribe { request, reply } => {
                let _ = reply.send(self.subscribe(request));
            }
            RelayMessage::Unsubscribe {
                subscriber_id,
                registration,
            } => match registration {
                Some(registration) => {
                    self.bus.release(&subscriber_id, registration);
                }
                None => {
                    self.bus.unsubscribe(&subscriber_id);
                }
            },
            RelayMessage::Submit {
                subscriber_id,
                command,
                reply,
            } => {
                let result = self.submit(&subscriber_id, command);
                if let Err(e) = &result {
                    warn!(%subscriber_id, code = e.code(), error = %e, "Command rejected");
                }
                let _ = reply.send(result);
            }
            RelayMessage::Snapshot { reply } => {
                let _ = reply.send((self.store.current_seq(), self.snapshot_now()));
            }
            RelayMessage::Stats { reply } => {
                let bus = self.bus.stats();
                let _ = reply.send(RelayStats {
                    seq: self.store.current_seq(),
                    backlog: self.store.backlog_len(),
                    subscribers: bus.subscribers,
                    evicted: bus.evicted,
                    pending_permissions: self.correlator.len(),
                });
            }
            // Consumed by the run loop.
            RelayMessage::Shutdown => {}
        }
    }

    /// Store snapshot plus the prompts still waiting for an answer.
    fn snapshot_now(&self) -> SessionSnapshot {
        let mut snapshot = self.store.snapshot().clone();
        snapshot.pending_permissions = self.correlator.pending_requests(Instant::now());
        snapshot
    }

    /// Sequence one event and fan it out.
    fn emit(&mut self, event: LogicalEvent) {
        let status = self.store.snapshot().status;
        if matches!(&event, LogicalEvent::StatusChange(change) if change.status == status) {
            return;
        }
        let sequenced = self.store.apply(event);
        self.bus.publish(&sequenced, self.store.oldest_retained());
    }

    fn emit_all(&mut self, events: impl IntoIterator<Item = LogicalEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn on_upstream_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let msg = match ndjson::parse_line(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, len = line.len(), "Dropping undecodable upstream frame");
                self.emit(LogicalEvent::error(ErrorCode::DecodeError, e.to_string()));
                return;
            }
        };

        match msg {
            Message::ControlRequest(request) => self.on_control_request(request),
            Message::ControlCancel { request_id } => {
                match self.correlator.cancel(&request_id, CancelReason::Upstream) {
                    Some(cancelled) => self.emit(LogicalEvent::PermissionCancelled(cancelled)),
                    None => debug!(request_id, "Upstream cancelled an unknown request"),
                }
            }
            Message::ControlResponse(response) => self.on_control_response(response),
            Message::KeepAlive => debug!("Upstream keep-alive"),
            other => {
                let events = self.reassembler.convert(other);
                self.emit_all(events);
            }
        }
    }

    fn on_control_request(&mut self, request: ControlRequest) {
        match request.request {
            ControlRequestType::CanUseTool {
                tool_name,
                input,
                tool_use_id,
            } => {
                let open = OpenRequest {
                    request_id: request.request_id,
                    tool_name,
                    tool_use_id,
                    input,
                };
                if let Some(event) = self.correlator.open(open, Instant::now()) {
                    self.emit(LogicalEvent::PermissionRequest(event));
                }
            }
            ControlRequestType::Unknown(payload) => {
                debug!(request_id = %request.request_id, "Forwarding unknown control request");
                self.emit(LogicalEvent::Unknown {
                    tag: "control_request".to_string(),
                    payload,
                });
            }
        }
    }

    fn on_control_response(&mut self, response: ControlResponse) {
        let patch = response
            .request_id
            .as_ref()
            .and_then(|id| self.pending_controls.remove(id));
        if let Some(error) = response.error {
            warn!(
                request_id = ?response.request_id,
                error = %error,
                "Upstream rejected control request"
            );
            return;
        }
        debug!(
            request_id = ?response.request_id,
            subtype = %response.subtype,
            "Upstream acknowledged control request"
        );
        if let Some(patch) = patch {
            self.emit(LogicalEvent::SessionPatch(patch));
        }
    }

    fn on_upstream_state(&mut self, state: UpstreamState, message: String) {
        if state == UpstreamState::Disconnected {
            if let Some(event) = self.reassembler.abort("upstream disconnected") {
                self.emit(event);
            }
            let cancelled = self
                .correlator
                .cancel_all(CancelReason::UpstreamDisconnected);
            self.emit_all(cancelled.into_iter().map(LogicalEvent::PermissionCancelled));
            self.pending_controls.clear();
            self.emit(LogicalEvent::StatusChange(StatusChange {
                status: AgentStatus::Idle,
            }));
        }

        info!(from = ?self.upstream_state, to = ?state, %message, "Upstream state changed");
        self.upstream_state = state;
        self.emit(LogicalEvent::ConnectionNotice(ConnectionNotice { state, message }));
    }

    fn subscribe(&mut self, request: SubscribeRequest) -> Result<Subscription, SubscribeError> {
        let current = self.store.current_seq();
        let (replay, snapshot) = match request.resume {
            ResumeFrom::Snapshot => (Vec::new(), Some(self.snapshot_now())),
            ResumeFrom::Sequence(last_seq) => match self.store.replay_from(last_seq) {
                Ok(replay) => (replay, None),
                Err(gap) => {
                    warn!(
                        subscriber_id = %request.subscriber_id,
                        requested = gap.requested,
                        oldest_available = gap.oldest_available,
                        current = gap.current,
                        "Replay unavailable, subscriber must resync"
                    );
                    return Err(gap.into());
                }
            },
        };

        let stream = self.bus.register(
            &request.subscriber_id,
            &request.client_type,
            replay,
            current,
        )?;
        let registration = self.bus.registration(&request.subscriber_id).unwrap_or_default();
        Ok(Subscription {
            subscriber_id: request.subscriber_id,
            registration,
            seq: current,
            snapshot,
            stream,
        })
    }

    fn submit(
        &mut self,
        subscriber_id: &str,
        command: ClientCommand,
    ) -> Result<CommandOutcome, RelayError> {
        debug!(subscriber_id, kind = command.kind(), "Command received");
        match command {
            ClientCommand::UserInput { content } => {
                let session_id = self.store.snapshot().session_id.clone();
                self.sink
                    .send(UpstreamCommand::UserInput { content, session_id })?;
            }
            ClientCommand::PermissionResponse {
                request_id,
                decision,
                updated_input,
                message,
            } => {
                let resolution = self.correlator.resolve(
                    &request_id,
                    decision,
                    updated_input,
                    message,
                    subscriber_id,
                )?;
                self.emit(LogicalEvent::PermissionResolved(resolution.event));
                self.sink.send(resolution.command)?;
            }
            ClientCommand::Interrupt => self.sink.send(interrupt_command())?,
            ClientCommand::SetModel { model } => {
                let request_id = new_request_id();
                self.sink.send(UpstreamCommand::SetModel {
                    request_id: request_id.clone(),
                    model: model.clone(),
                })?;
                // Reverting to the agent default leaves the model unknown until
                // the next init.
                if let Some(model) = model {
                    let patch = SessionPatch {
                        model: Some(model),
                        ..SessionPatch::default()
                    };
                    self.pending_controls.insert(request_id, patch);
                }
            }
            ClientCommand::SetPermissionMode { mode } => {
                let request_id = new_request_id();
                self.sink.send(UpstreamCommand::SetPermissionMode {
                    request_id: request_id.clone(),
                    mode: mode.clone(),
                })?;
                let patch = SessionPatch {
                    permission_mode: Some(mode),
                    ..SessionPatch::default()
                };
                self.pending_controls.insert(request_id, patch);
            }
            ClientCommand::Snapshot => {
                return Ok(CommandOutcome::Snapshot {
                    seq: self.store.current_seq(),
                    snapshot: self.snapshot_now(),
                });
            }
        }
        Ok(CommandOutcome::Accepted)
    }

    fn expire_permissions(&mut self) {
        let expired = self.correlator.expire(Instant::now());
        self.emit_all(expired.into_iter().map(LogicalEvent::PermissionCancelled));
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
