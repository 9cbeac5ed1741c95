use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{info, warn, LevelFilter};
use simple_logger::SimpleLogger;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use poolwatch::{ConsoleSink, PoolObserver, RedpandaPublisher, Settings, SnapshotSink};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    // Optional config path as the first argument, `config.yaml` otherwise
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_path(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    };

    let level: LevelFilter = settings
        .logging
        .level
        .parse()
        .with_context(|| format!("Invalid log level {}", settings.logging.level))?;

    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("Failed to initialize logger")?;

    if settings.observers.is_empty() {
        warn!("No observers configured, nothing to do");
        return Ok(());
    }

    let publisher: Option<Arc<dyn SnapshotSink>> = settings
        .redpanda
        .as_ref()
        .and_then(RedpandaPublisher::new)
        .map(|p| Arc::new(p) as Arc<dyn SnapshotSink>);

    let mut observers = Vec::with_capacity(settings.observers.len());
    for observer_settings in &settings.observers {
        let mut observer = PoolObserver::from_settings(observer_settings)
            .with_context(|| format!("Invalid settings for observer {}", observer_settings.name))?;

        observer.on_snapshot(ConsoleSink);
        if let Some(publisher) = &publisher {
            observer.on_snapshot_shared(publisher.clone());
        }

        observer.start(None).await.with_context(|| {
            format!(
                "Failed to start observer {}. Check the endpoint and pool address.",
                observer_settings.name
            )
        })?;

        observers.push(observer);
    }

    info!("{} observer(s) running. Press Ctrl+C to stop.", observers.len());

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Stopping observers...");
    for observer in &mut observers {
        observer.shutdown().await;
    }

    // Last reference: flushes pending Redpanda messages
    drop(observers);
    drop(publisher);

    info!("All observers stopped");
    Ok(())
}
