//! agentmux daemon
//!
//! Runs one agent process and relays its session to every connected client.

use std::net::SocketAddr;
use std::path::PathBuf;

use agentmux_core::config::{self, OutboundPolicy, PermissionStrategy};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use agentmux_daemon::relay::{CommandSink, RelayOptions, SessionRelay};
use agentmux_daemon::server;
use agentmux_daemon::upstream::{
    ProcessConfig, ProcessConnector, ReconnectPolicy, UpstreamSupervisor,
};

#[derive(Parser, Debug)]
#[command(name = "agentmux-daemon")]
#[command(version, about = "agentmux daemon - agent session relay")]
struct Args {
    /// TCP bind address for subscribers (overrides config)
    #[arg(long, env = "AGENTMUX_ADDR")]
    addr: Option<SocketAddr>,

    /// Project directory; its `.agentmux/settings.json` is merged over the global config
    #[arg(long, env = "AGENTMUX_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Path to the `claude` CLI binary
    #[arg(long, env = "AGENTMUX_CLAUDE_BIN")]
    claude_bin: Option<PathBuf>,

    /// Working directory for the agent process
    #[arg(long, env = "AGENTMUX_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Model passed to the agent process
    #[arg(long, env = "AGENTMUX_MODEL")]
    model: Option<String>,

    /// How tool permissions are handled by the agent process.
    #[arg(
        long,
        env = "AGENTMUX_PERMISSION_STRATEGY",
        value_parser = ["prompt-tool-stdio", "skip-permissions"]
    )]
    permission_strategy: Option<String>,

    /// What happens to commands submitted while the upstream is down.
    #[arg(
        long,
        env = "AGENTMUX_OUTBOUND_POLICY",
        value_parser = ["queue", "reject"]
    )]
    outbound_policy: Option<String>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "AGENTMUX_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "AGENTMUX_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("agentmux_daemon={}", args.log_level);
    agentmux_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let mut config = config::load_config(args.project_dir.as_deref())?;
    config::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr;
    }
    if let Some(bin) = args.claude_bin {
        config.upstream.claude_bin = bin;
    }
    if let Some(dir) = args.working_dir {
        config.upstream.working_directory = Some(dir);
    }
    if let Some(model) = args.model {
        config.upstream.model = Some(model);
    }
    match args.permission_strategy.as_deref() {
        Some("skip-permissions") => {
            config.upstream.permission_strategy = PermissionStrategy::SkipPermissions;
        }
        Some(_) => config.upstream.permission_strategy = PermissionStrategy::PromptToolStdio,
        None => {}
    }
    match args.outbound_policy.as_deref() {
        Some("reject") => config.upstream.outbound_policy = OutboundPolicy::Reject,
        Some(_) => config.upstream.outbound_policy = OutboundPolicy::Queue,
        None => {}
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        claude_bin = %config.upstream.claude_bin.display(),
        permission_strategy = ?config.upstream.permission_strategy,
        outbound_policy = ?config.upstream.outbound_policy,
        "Starting agentmux-daemon"
    );

    let (sink, _sink_task) = CommandSink::spawn(
        config.upstream.outbound_policy,
        config.upstream.outbound_queue_capacity,
    );
    let (relay, relay_task) = SessionRelay::spawn(
        RelayOptions::from_config(&config.relay, &config.permissions),
        sink,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor = UpstreamSupervisor::new(
        ProcessConnector::new(ProcessConfig::from(&config.upstream)),
        relay.clone(),
        ReconnectPolicy::from(&config.upstream.reconnect),
        config.relay.keepalive_interval(),
    );
    let upstream_rx = shutdown_rx.clone();
    let mut upstream_task = tokio::spawn(async move { supervisor.run(upstream_rx).await });

    let listener = TcpListener::bind(config.server.listen_addr).await?;
    let server_task = tokio::spawn(server::serve(listener, relay.clone(), shutdown_rx));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
        _ = &mut upstream_task => {
            warn!("Upstream supervisor stopped; shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    if !upstream_task.is_finished() {
        let _ = upstream_task.await;
    }
    match server_task.await {
        Ok(Err(e)) => warn!(error = %e, "Server stopped with error"),
        Err(e) => warn!(error = %e, "Server task panicked"),
        Ok(Ok(())) => {}
    }
    relay.shutdown().await;
    let _ = relay_task.await;

    info!("Daemon stopped");
    Ok(())
}
