use std::path::Path;
use std::sync::Arc;

use lnplane::start_server;
use lnplane::PlaneBuilder;
use lnplane::Result;
use lnplane::Settings;
use lnplane::Supervisor;
use lnplane::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let settings = Settings::load(None)?;

    // Initializing Logs
    let _guard = init_observability(&settings.app.log_dir);

    // Initializing Shutdown Signals
    let (metrics_tx, metrics_rx) = watch::channel(());
    let shutdown = CancellationToken::new();
    let actors = CancellationToken::new();

    let metrics = settings.app.metrics_enabled.then_some(settings.app.metrics_port);
    let supervisor_config = settings.supervisor.clone();
    let services = PlaneBuilder::new(settings, actors.clone()).build().await?;
    let plane = services.plane.clone();

    if let Some(port) = metrics {
        tokio::spawn(start_server(port, metrics_rx));
    }

    let supervisor = Supervisor::new(
        plane.caches.services.clone(),
        plane.caches.settings.clone(),
        Arc::new(services),
        supervisor_config,
    );

    info!("Application started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = graceful_shutdown(signal_token, metrics_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = supervisor.run(shutdown).await {
        error!("supervisor stopped: {:?}", e);
    }

    // Caches and the bus outlive every worker
    actors.cancel();
    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(
    shutdown: CancellationToken,
    metrics_tx: watch::Sender<()>,
) -> Result<()> {
    let signal_error = |e: std::io::Error| SystemError::SignalSenderClosed(e.to_string());
    let mut sigint = signal(SignalKind::interrupt()).map_err(signal_error)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(signal_error)?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    shutdown.cancel();
    // No receiver is left when metrics are disabled
    metrics_tx.send_replace(());

    info!("Shutdown completed");
    Ok(())
}

fn init_observability(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "lnplane.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(file_layer).init();

    guard
}
