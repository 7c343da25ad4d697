//! Newline-delimited JSON transport for subscribers.
//!
//! Each TCP connection is one subscriber: a `hello` line, then commands in and
//! sequenced events out. See [`agentmux_core::downstream`] for the frames.

mod connection;

pub use connection::handle_connection;

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::relay::RelayHandle;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Accept subscribers until `shutdown` flips.
pub async fn serve(
    listener: TcpListener,
    relay: RelayHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    info!(addr = %listener.local_addr()?, "Accepting subscribers");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                let relay = relay.clone();
                tokio::spawn(async move {
                    debug!(%peer, "Subscriber connected");
                    if let Err(e) = handle_connection(stream, relay).await {
                        warn!(%peer, error = %e, "Subscriber connection failed");
                    }
                    debug!(%peer, "Subscriber disconnected");
                });
            }
            _ = shutdown.changed() => {
                info!("Listener shutting down");
                return Ok(());
            }
        }
    }
}
