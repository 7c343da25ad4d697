//! One subscriber connection.

use agentmux_core::command::ClientCommand;
use agentmux_core::downstream::{Hello, ServerFrame};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::relay::{CommandOutcome, RelayError, RelayHandle, SubscribeRequest};
use crate::session::{Delivery, DeliveryStream, SubscribeError};

use super::ServerError;

/// Serve one subscriber until either side closes.
///
/// The first line must be a [`Hello`]. A subscriber whose replay point is no
/// longer retained gets a `resync_required` frame and the connection closes.
pub async fn handle_connection<S>(stream: S, relay: RelayHandle) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let hello: Hello = match serde_json::from_str(&first) {
        Ok(hello) => hello,
        Err(e) => {
            warn!(error = %e, "Invalid hello");
            let frame = ServerFrame::Error {
                code: "invalid_hello".into(),
                message: e.to_string(),
            };
            return write_frame(&mut write_half, &frame).await;
        }
    };

    let subscriber_id = hello
        .client_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = SubscribeRequest {
        subscriber_id: subscriber_id.clone(),
        client_type: hello
            .client_type
            .clone()
            .unwrap_or_else(|| "unknown".into()),
        resume: hello.resume_from(),
    };
    let subscription = match relay.subscribe(request).await {
        Ok(subscription) => subscription,
        Err(RelayError::Subscribe(SubscribeError::ResyncRequired {
            requested,
            oldest_available,
            current,
        })) => {
            let frame = ServerFrame::ResyncRequired {
                requested,
                oldest_available,
                current,
            };
            return write_frame(&mut write_half, &frame).await;
        }
        Err(e) => {
            let frame = ServerFrame::Error {
                code: e.code().into(),
                message: e.to_string(),
            };
            return write_frame(&mut write_half, &frame).await;
        }
    };

    info!(
        %subscriber_id,
        seq = subscription.seq,
        snapshot = subscription.snapshot.is_some(),
        "Subscriber joined"
    );
    let welcome = ServerFrame::Welcome {
        subscriber_id: subscriber_id.clone(),
        seq: subscription.seq,
        snapshot: subscription.snapshot,
    };
    write_frame(&mut write_half, &welcome).await?;

    let registration = subscription.registration;
    let (reply_tx, reply_rx) = mpsc::channel(32);
    let mut writer = tokio::spawn(write_loop(write_half, subscription.stream, reply_rx));

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut writer => {
                debug!(%subscriber_id, "Delivery stream ended");
                break;
            }
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                let Some(reply) = handle_command(&relay, &subscriber_id, &line).await else {
                    continue;
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%subscriber_id, error = %e, "Subscriber read failed");
                break;
            }
        }
    }

    relay.release(&subscriber_id, registration).await;
    writer.abort();
    info!(%subscriber_id, "Subscriber left");
    Ok(())
}

/// Run one command; returns the frame owed to the requester, if any.
async fn handle_command(
    relay: &RelayHandle,
    subscriber_id: &str,
    line: &str,
) -> Option<ServerFrame> {
    let command: ClientCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(subscriber_id, error = %e, "Invalid command");
            return Some(ServerFrame::Error {
                code: "invalid_command".into(),
                message: e.to_string(),
            });
        }
    };

    match relay.submit(subscriber_id, command).await {
        Ok(CommandOutcome::Accepted) => None,
        Ok(CommandOutcome::Snapshot { seq, snapshot }) => {
            Some(ServerFrame::Snapshot { seq, snapshot })
        }
        Err(e) => Some(ServerFrame::Error {
            code: e.code().into(),
            message: e.to_string(),
        }),
    }
}

/// Sole writer for the connection: replies first, then deliveries.
async fn write_loop<W>(
    mut writer: W,
    mut deliveries: DeliveryStream,
    mut replies: mpsc::Receiver<ServerFrame>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            reply = replies.recv() => match reply {
                Some(frame) => frame,
                None => return,
            },
            delivery = deliveries.next() => match delivery {
                Some(Delivery::Event(event)) => ServerFrame::Event((*event).clone()),
                Some(Delivery::ResyncRequired(gap)) => {
                    let frame = ServerFrame::ResyncRequired {
                        requested: gap.requested,
                        oldest_available: gap.oldest_available,
                        current: gap.current,
                    };
                    let _ = write_frame(&mut writer, &frame).await;
                    return;
                }
                None => return,
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Subscriber write failed");
            return;
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &ServerFrame) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
