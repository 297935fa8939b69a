//! Logging setup and the job event log.

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::{backend::QueueBackend, JobEvent};

/// Install the global subscriber. `RUST_LOG` filters, defaulting to `info`.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) -> crate::QueueResult<()> {
    use crate::QueueError;
    use tracing::Level;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| QueueError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log every backend lifecycle event until the stream closes
pub fn spawn_event_logger(backend: &dyn QueueBackend) -> JoinHandle<()> {
    let mut events = backend.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
        }
    })
}

fn log_event(event: &JobEvent) {
    match event {
        JobEvent::Enqueued { job_id, queue, kind, .. } => {
            debug!(job_id = %job_id, queue = %queue, kind = %kind, "job enqueued")
        }
        JobEvent::Active { job_id, attempt, .. } => debug!(job_id = %job_id, attempt, "job active"),
        JobEvent::Delayed { job_id, run_at, error, .. } => {
            debug!(job_id = %job_id, run_at = %run_at, error = %error, "job delayed for retry")
        }
        JobEvent::Completed { job_id, .. } => debug!(job_id = %job_id, "job completed"),
        JobEvent::Failed { job_id, error, .. } => warn!(job_id = %job_id, error = %error, "job failed"),
        JobEvent::Stalled { job_id, .. } => warn!(job_id = %job_id, "job stalled"),
    }
}
