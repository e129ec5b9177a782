use anyhow::{Context, Result};
use procwatch_daemon::{
    aggregator::Aggregator,
    classifier::{Classifier, ProcOwners},
    config::Config,
    pipeline::Pipeline,
    resolver::{run_periodic, WindowResolver},
    service::{publish_events, Service},
    socket::IpcServer,
    source::TelemetrySource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> Config {
    let config_path = Config::config_path();
    if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found, using defaults");
        Config::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("procwatch daemon starting...");

    let config = load_config();
    let running = Arc::new(AtomicBool::new(true));

    // Window owners feed the classifier; refreshed on their own schedule
    let resolver = Arc::new(WindowResolver::from_config(&config.resolver));
    if config.resolver.enabled {
        tokio::spawn(run_periodic(
            Arc::clone(&resolver),
            config.resolver.refresh_interval(),
            Arc::clone(&running),
        ));
    }

    let classifier = Classifier::with_config(
        resolver.handle(),
        Box::new(ProcOwners::new()),
        &config.classifier,
    );
    let pipeline = Pipeline::new(classifier, Aggregator::new(config.classifier.cache_cleanup_cycles));
    let shared = pipeline.state();

    let socket_path = config.ipc.socket_path.clone().unwrap_or_else(IpcServer::default_path);
    let server = IpcServer::bind(&socket_path, config.ipc.broadcast_capacity).await?;

    let (source, frames) = TelemetrySource::spawn(&config.source, Arc::clone(&running))
        .with_context(|| format!("failed to start telemetry source {:?}", config.source.command))?;

    let service = Arc::new(Service::new(shared, resolver.handle(), config.ipc.end_task_grace()));
    let (events_tx, events_rx) = mpsc::channel(config.source.frame_queue.max(1));
    tokio::spawn(pipeline.run(frames, events_tx));
    tokio::spawn(publish_events(events_rx, server.pushes(), Arc::clone(&service)));

    info!("Daemon ready, listening for connections...");
    server
        .serve(service, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {}", e);
            }
            info!("Shutdown requested");
        })
        .await;

    running.store(false, Ordering::Release);
    source.shutdown().await?;
    info!("procwatch daemon stopped");
    Ok(())
}
