//! Upstream connection state machine.
//!
//! `Disconnected → Connecting → Connected (→ Stale → Connected) → Disconnected`,
//! with exponential backoff between attempts. Every transition is reported to
//! the relay, which turns it into a connection notice; the relay itself never
//! learns how the connection is made.

use std::time::{Duration, Instant};

use agentmux_core::event::UpstreamState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::relay::RelayHandle;

use super::policy::ReconnectPolicy;
use super::types::{ConnectContext, UpstreamConnector, UpstreamReader};

/// A connection that stayed up this long resets the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

enum PumpOutcome {
    /// Upstream reached EOF.
    Closed,
    Failed(String),
    Shutdown,
    RelayGone,
}

/// Keeps one upstream connection alive and feeds its frames to the relay.
pub struct UpstreamSupervisor<C> {
    connector: C,
    relay: RelayHandle,
    policy: ReconnectPolicy,
    keepalive: Duration,
}

impl<C: UpstreamConnector> UpstreamSupervisor<C> {
    pub const fn new(
        connector: C,
        relay: RelayHandle,
        policy: ReconnectPolicy,
        keepalive: Duration,
    ) -> Self {
        Self {
            connector,
            relay,
            policy,
            keepalive,
        }
    }

    /// Run until shutdown, the relay stops, or reconnect attempts run out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Resume the same upstream conversation across reconnects.
            let ctx = match self.relay.snapshot().await {
                Ok((_, snapshot)) => ConnectContext {
                    resume_session: snapshot.session_id,
                    model: snapshot.model,
                },
                Err(_) => break,
            };
            self.notify(
                UpstreamState::Connecting,
                format!("connecting (attempt {})", attempt.saturating_add(1)),
            )
            .await;

            let connected = tokio::select! {
                result = self.connector.connect(&ctx) => result,
                _ = shutdown.changed() => break,
            };

            let started = Instant::now();
            let outcome = match connected {
                Ok(conn) => {
                    info!(
                        label = %conn.label,
                        resume_session = ?ctx.resume_session,
                        model = ?ctx.model,
                        "Upstream connected"
                    );
                    self.relay.sink().attach(conn.writer).await;
                    self.notify(UpstreamState::Connected, conn.label).await;
                    let outcome = self.pump(conn.reader, &mut shutdown).await;
                    self.relay.sink().detach().await;
                    self.connector.disconnect().await;
                    outcome
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Upstream connect failed");
                    PumpOutcome::Failed(e.to_string())
                }
            };

            match outcome {
                PumpOutcome::Shutdown => {
                    self.notify(UpstreamState::Disconnected, "relay shutting down")
                        .await;
                    break;
                }
                PumpOutcome::RelayGone => break,
                PumpOutcome::Closed => {
                    self.notify(UpstreamState::Disconnected, "upstream closed the connection")
                        .await;
                }
                PumpOutcome::Failed(reason) => {
                    self.notify(UpstreamState::Disconnected, reason).await;
                }
            }

            if started.elapsed() > STABLE_CONNECTION {
                attempt = 0;
            }
            if !self.policy.should_retry(attempt) {
                error!(attempt, "Max reconnect attempts reached");
                break;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting to upstream");
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            attempt = attempt.saturating_add(1);
        }

        self.connector.disconnect().await;
        info!("Upstream supervisor stopped");
    }

    /// Forward lines until EOF, error or shutdown, reporting silence as stale.
    async fn pump(
        &self,
        reader: UpstreamReader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpOutcome {
        let mut lines = BufReader::new(reader).lines();
        let mut stale = false;

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(self.keepalive, lines.next_line()) => next,
                _ = shutdown.changed() => return PumpOutcome::Shutdown,
            };

            match next {
                Err(_) => {
                    if !stale {
                        stale = true;
                        warn!(
                            silent_secs = self.keepalive.as_secs(),
                            "Upstream silent past keep-alive interval"
                        );
                        self.notify(
                            UpstreamState::Stale,
                            format!("no upstream traffic for {}s", self.keepalive.as_secs()),
                        )
                        .await;
                    }
                }
                Ok(Ok(Some(line))) => {
                    if stale {
                        stale = false;
                        self.notify(UpstreamState::Connected, "upstream traffic resumed")
                            .await;
                    }
                    if self.relay.upstream_line(line).await.is_err() {
                        return PumpOutcome::RelayGone;
                    }
                }
                Ok(Ok(None)) => {
                    debug!("Upstream reached EOF");
                    return PumpOutcome::Closed;
                }
                Ok(Err(e)) => return PumpOutcome::Failed(format!("upstream read failed: {e}")),
            }
        }
    }

    async fn notify(&self, state: UpstreamState, message: impl Into<String>) {
        let _ = self.relay.upstream_state(state, message).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use agentmux_core::config::OutboundPolicy;
    use agentmux_core::downstream::ResumeFrom;
    use agentmux_core::event::LogicalEvent;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio_stream::StreamExt;

    use crate::relay::{CommandSink, RelayOptions, SessionRelay, SubscribeRequest};
    use crate::session::{Delivery, DeliveryStream};
    use crate::upstream::{UpstreamConnection, UpstreamError};

    /// Hands out pre-built duplex pipes, one per connect.
    struct PipeConnector {
        pipes: Mutex<Vec<DuplexStream>>,
        contexts: Mutex<Vec<ConnectContext>>,
        disconnects: AtomicU32,
    }

    impl PipeConnector {
        fn new(pipes: Vec<DuplexStream>) -> Self {
            Self {
                pipes: Mutex::new(pipes),
                contexts: Mutex::new(Vec::new()),
                disconnects: AtomicU32::new(0),
            }
        }
    }

    impl UpstreamConnector for Arc<PipeConnector> {
        async fn connect(&self, ctx: &ConnectContext) -> Result<UpstreamConnection, UpstreamError> {
            self.contexts.lock().unwrap().push(ctx.clone());
            let pipe = self.pipes.lock().unwrap().pop();
            match pipe {
                Some(pipe) => {
                    let (reader, writer) = tokio::io::split(pipe);
                    Ok(UpstreamConnection {
                        reader: Box::new(reader),
                        writer: Box::new(writer),
                        label: "pipe".into(),
                    })
                }
                None => Err(UpstreamError::Connection("no more pipes".into())),
            }
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_attempts: Some(max_attempts),
        }
    }

    async fn next_notice(stream: &mut DeliveryStream) -> UpstreamState {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .unwrap()
            {
                Some(Delivery::Event(e)) => {
                    if let LogicalEvent::ConnectionNotice(n) = &e.event {
                        return n.state;
                    }
                }
                other => panic!("expected event, got {other:?}"),
            }
        }
    }

    async fn relay_with_subscriber() -> (RelayHandle, DeliveryStream) {
        let (sink, _) = CommandSink::spawn(OutboundPolicy::Queue, 16);
        let (relay, _) = SessionRelay::spawn(RelayOptions::default(), sink);
        let sub = relay
            .subscribe(SubscribeRequest {
                subscriber_id: "watcher".into(),
                client_type: "test".into(),
                resume: ResumeFrom::Sequence(0),
            })
            .await
            .unwrap();
        (relay, sub.stream)
    }

    #[tokio::test]
    async fn reconnects_and_resumes_session() {
        let (mut first_agent, first) = tokio::io::duplex(4096);
        let (second_agent, second) = tokio::io::duplex(4096);
        let connector = Arc::new(PipeConnector::new(vec![second, first]));
        let (relay, mut events) = relay_with_subscriber().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = UpstreamSupervisor::new(
            Arc::clone(&connector),
            relay.clone(),
            fast_policy(5),
            Duration::from_secs(30),
        );
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        assert_eq!(next_notice(&mut events).await, UpstreamState::Connecting);
        assert_eq!(next_notice(&mut events).await, UpstreamState::Connected);

        let init = r#"{"type":"system","subtype":"init","session_id":"S1","model":"m"}"#;
        first_agent
            .write_all(format!("{init}\n").as_bytes())
            .await
            .unwrap();
        drop(first_agent);

        assert_eq!(next_notice(&mut events).await, UpstreamState::Disconnected);
        assert_eq!(next_notice(&mut events).await, UpstreamState::Connecting);
        assert_eq!(next_notice(&mut events).await, UpstreamState::Connected);

        let contexts = connector.contexts.lock().unwrap().clone();
        assert_eq!(contexts.len(), 2);
        assert!(contexts[0].resume_session.is_none());
        assert_eq!(contexts[1].resume_session.as_deref(), Some("S1"));
        assert_eq!(contexts[1].model.as_deref(), Some("m"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        drop(second_agent);
        assert!(connector.disconnects.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn silence_is_reported_as_stale_then_recovers() {
        let (mut agent, pipe) = tokio::io::duplex(4096);
        let connector = Arc::new(PipeConnector::new(vec![pipe]));
        let (relay, mut events) = relay_with_subscriber().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = UpstreamSupervisor::new(
            connector,
            relay.clone(),
            fast_policy(0),
            Duration::from_millis(50),
        );
        let task = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

        assert_eq!(next_notice(&mut events).await, UpstreamState::Connecting);
        assert_eq!(next_notice(&mut events).await, UpstreamState::Connected);
        assert_eq!(next_notice(&mut events).await, UpstreamState::Stale);

        agent.write_all(b"{\"type\":\"keep_alive\"}\n").await.unwrap();
        assert_eq!(next_notice(&mut events).await, UpstreamState::Connected);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let connector = Arc::new(PipeConnector::new(vec![]));
        let (relay, _events) = relay_with_subscriber().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = UpstreamSupervisor::new(
            Arc::clone(&connector),
            relay,
            fast_policy(2),
            Duration::from_secs(30),
        );
        tokio::time::timeout(Duration::from_secs(2), supervisor.run(shutdown_rx))
            .await
            .unwrap();
        assert_eq!(connector.contexts.lock().unwrap().len(), 3);
    }
}
