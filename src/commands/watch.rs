//! Watch command: continuous monitoring until interrupted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::OutputMode;
use crate::config::Config;
use crate::display::{Dashboard, JsonLines, LogSummary};
use crate::handlers;
use crate::resolver::ProcessResolver;
use crate::sampler::Sampler;
use crate::scheduler::{Scheduler, StatusSink};
use crate::state::{AppState, ExporterSink};

use super::cancel_on_signal;

pub async fn command_watch(
    config: &Config,
    output: OutputMode,
    listen: Option<SocketAddr>,
) -> anyhow::Result<()> {
    let target = config.to_target()?;
    let listen = match listen {
        Some(addr) => Some(addr),
        None => config
            .listen
            .as_deref()
            .map(str::parse::<SocketAddr>)
            .transpose()
            .context("invalid listen address in config")?,
    };

    info!(
        "Watching {} on {} (inspector port {}, every {:?})",
        target.selector, target.host, target.inspect_port, target.polling_interval
    );

    let mut sinks: Vec<Box<dyn StatusSink>> = Vec::new();
    match output {
        OutputMode::Table => sinks.push(Box::new(Dashboard::stdout(target.heap_limit_bytes))),
        OutputMode::Json => sinks.push(Box::new(JsonLines::new(io::stdout()))),
        OutputMode::Log => sinks.push(Box::new(LogSummary)),
    }

    let cancel = CancellationToken::new();

    let server = match listen {
        Some(addr) => {
            let state = AppState::shared(target.selector.to_string())
                .context("failed to register exporter metrics")?;
            sinks.push(Box::new(ExporterSink::new(state.clone())));

            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind exporter to {addr}"))?;
            info!("Exporter listening on http://{}", addr);

            let shutdown = cancel.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, handlers::router(state))
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    let sampler = Sampler::for_target(&target);
    let scheduler = Scheduler::new(
        target,
        sampler,
        Arc::new(ProcessResolver::new()),
        Box::new(sinks),
    );

    tokio::spawn(cancel_on_signal(cancel.clone()));
    let result = scheduler.start(cancel.clone()).await;
    // Also stops the exporter when the loop ended on its own.
    cancel.cancel();

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Exporter failed: {}", e),
            Err(e) => error!("Exporter task panicked: {}", e),
        }
    }

    result.context("monitoring stopped")?;
    info!("stackpulse stopped gracefully");
    Ok(())
}
