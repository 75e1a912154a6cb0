// Server mode - UDP DNS forwarder with answer logging
//
// Chain: AnswerLog -> UpstreamForwarder
// - Every answered owner name is upserted into the `answers` table
// - SQLite or Postgres storage, schema provisioned on startup
// - Structured logging with tracing
// - Graceful shutdown: stop accepting, finish in-flight requests, drain the
//   answer queue, then close the pool

use anyhow::{Context, Result};
use answerlog_config::RuntimeConfig;
use answerlog_core::{AnswerLog, Handler};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{error, info, warn};

mod forward;
mod init;
mod server;

pub use forward::UpstreamForwarder;
pub use init::{init_tracing, open_store};
pub use server::{serve_udp, UdpResponseSink};

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => sigterm.recv().await,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = async { None::<()> };

    let received = first_signal(signal::ctrl_c(), terminate).await;
    info!(signal = received, "Shutdown requested, draining");
}

/// Wait for whichever stop signal arrives first and name it. A source that
/// cannot be installed is ignored rather than treated as a stop request.
async fn first_signal<C, T>(ctrl_c: C, terminate: T) -> &'static str
where
    C: Future<Output = std::io::Result<()>>,
    T: Future<Output = Option<()>>,
{
    let ctrl_c = async {
        if let Err(e) = ctrl_c.await {
            error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        if terminate.await.is_none() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Entry point for server mode (loads config automatically)
pub async fn run() -> Result<()> {
    let config = RuntimeConfig::load().context("Failed to load configuration")?;
    run_with_config(config).await
}

/// Entry point for server mode with pre-loaded configuration (for CLI usage)
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    let upstream: SocketAddr = config
        .server
        .upstream
        .parse()
        .with_context(|| format!("Invalid upstream address: {}", config.server.upstream))?;

    let store = open_store(&config.storage).await?;

    let forwarder: Arc<dyn Handler> = Arc::new(UpstreamForwarder::new(
        upstream,
        config.server.upstream_timeout(),
    ));
    let answerlog = Arc::new(AnswerLog::with_capacity(
        Some(forwarder),
        Arc::new(store.clone()),
        config.pipeline.queue_capacity,
    ));

    let socket = UdpSocket::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.listen_addr))?;

    info!(
        listen = %config.server.listen_addr,
        upstream = %upstream,
        dialect = store.dialect(),
        "DNS listener ready"
    );
    info!("Press Ctrl+C or send SIGTERM to stop");

    let served = serve_udp(
        Arc::new(socket),
        Arc::clone(&answerlog) as Arc<dyn Handler>,
        shutdown_signal(),
    )
    .await;

    // Drain queued answers even when the listener failed
    answerlog.shutdown().await;
    store.close().await;

    served.context("Server error")?;
    info!("Server shutdown complete");

    Ok(())
}
