//! # Jobq load generator
//!
//! Schedules jobs for "now" from a set of producer tasks while consumer
//! tasks poll, complete, or fail them with a fixed retry delay. Store and
//! queue settings come from `config/` and `JOBQ__*`; the load shape comes
//! from `JOBQ_PERF__*` (see [`settings::PerfSettings`]).

use anyhow::Context;
use jobq_config::{AppConfig, ConfigLoader, LoggingConfig};
use jobq_queue::{register_metrics, MySqlQueue};
use jobq_store::{MySqlStore, StoreBackend};
use settings::PerfSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info};

mod load;
mod settings;

#[tokio::main]
async fn main() {
    let loaded = ConfigLoader::from_default_location();
    let logging = match &loaded {
        Ok(loader) => loader.get().await.logging,
        Err(_) => LoggingConfig::default(),
    };
    init_logging(&logging);

    info!("Starting jobq load generator...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let result = match loaded {
        Ok(loader) => run(loader.get().await).await,
        Err(e) => Err(e).context("Failed to load configuration"),
    };

    if let Err(e) = result {
        error!("Load generator error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let settings = Arc::new(PerfSettings::from_env().context("Invalid JOBQ_PERF settings")?);
    info!(?settings, "Load settings");

    register_metrics();

    let store = MySqlStore::new(config.store);
    store.init().await.context("Failed to initialize store")?;

    let queue = Arc::new(MySqlQueue::new(&store, config.queue)?);
    let stats = Arc::new(load::Stats::default());
    let stop = Arc::new(AtomicBool::new(false));

    let mut tasks = Vec::new();
    for worker in 0..settings.producers {
        tasks.push(tokio::spawn(load::produce(
            worker,
            Arc::clone(&queue),
            Arc::clone(&settings),
            Arc::clone(&stats),
            Arc::clone(&stop),
        )));
    }
    for worker in 0..settings.consumers {
        tasks.push(tokio::spawn(load::consume(
            worker,
            Arc::clone(&queue),
            Arc::clone(&settings),
            Arc::clone(&stats),
            Arc::clone(&stop),
        )));
    }

    let started = Instant::now();
    tokio::select! {
        () = tokio::time::sleep(settings.duration()) => {
            info!("Run duration elapsed, stopping workers...");
        }
        () = shutdown_signal() => {}
    }
    stop.store(true, Ordering::Relaxed);

    for task in tasks {
        if let Err(e) = task.await {
            error!("Worker task failed: {}", e);
        }
    }
    let elapsed = started.elapsed();

    for (name, value) in stats.snapshot() {
        info!(counter = name, value, "Load result");
    }
    let scheduled = stats.scheduled.load(Ordering::Relaxed);
    #[allow(clippy::cast_precision_loss)]
    let rate = scheduled as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        schedules_per_sec = rate,
        "Load generator finished"
    );

    queue.shutdown().await;
    store.close().await;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, stopping workers...");
        }
        () = terminate => {
            info!("Received terminate signal, stopping workers...");
        }
    }
}
