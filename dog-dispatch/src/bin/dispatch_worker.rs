use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use dog_dispatch::config::BackendKind;
use dog_dispatch::effects::{EchoDataHandler, LogEmailTransport};
use dog_dispatch::{observability, Effects, MemoryBackend, QueueAdapter, QueueBackend, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let settings = Settings::from_env();
    observability::init_tracing(settings.json_logs)?;

    match settings.backend {
        BackendKind::Memory => run(MemoryBackend::new(), &settings).await,
        BackendKind::Redis => run_redis(&settings).await,
    }
}

#[cfg(feature = "redis")]
async fn run_redis(settings: &Settings) -> Result<()> {
    let backend = dog_dispatch::RedisBackend::connect(&settings.redis).await?;
    run(backend, settings).await
}

#[cfg(not(feature = "redis"))]
async fn run_redis(_settings: &Settings) -> Result<()> {
    anyhow::bail!("QUEUE_BACKEND=redis requires building with the `redis` feature")
}

async fn run<B: QueueBackend + 'static>(backend: B, settings: &Settings) -> Result<()> {
    let adapter = QueueAdapter::with_config(backend, settings.queue.clone());
    let _event_log = observability::spawn_event_logger(adapter.backend());

    let effects = Effects::default()
        .with_email(Arc::new(LogEmailTransport::new().with_latency(Duration::from_secs(1))))
        .with_data(Arc::new(EchoDataHandler::new().with_latency(Duration::from_secs(2))));
    let registry = adapter.standard_processors(effects)?;
    let workers = adapter.start_workers(&registry);

    info!("Worker service is running on port {}", settings.worker_port);

    // Bootstrap is done; release jobs held by the readiness gate
    adapter.readiness().mark_ready();
    info!("Worker is ready to process jobs");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight jobs");
    workers.shutdown().await?;

    Ok(())
}
