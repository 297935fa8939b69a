use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    backend::QueueBackend, config::QueueConfig, job::Processor, JobStatus, LeasedJob, QueueError,
    QueueResult,
};

struct RunningWorker {
    queue: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<QueueResult<()>>,
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    workers: Vec<RunningWorker>,
}

impl WorkerHandle {
    /// Handle with no workers behind it
    pub fn empty() -> Self {
        Self { workers: Vec::new() }
    }

    /// Queues served by the workers behind this handle
    pub fn queues(&self) -> Vec<&'static str> {
        self.workers.iter().map(|w| w.queue).collect()
    }

    /// Combine two handles so they shut down together
    pub fn merge(mut self, other: WorkerHandle) -> Self {
        self.workers.extend(other.workers);
        self
    }

    /// Gracefully shutdown every worker. In-flight jobs run to completion.
    pub async fn shutdown(self) -> QueueResult<()> {
        let mut joins = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            let _ = worker.shutdown_tx.send(());
            joins.push((worker.queue, worker.join_handle));
        }

        let mut first_error = None;
        for (queue, join_handle) in joins {
            let result = join_handle
                .await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                error!("Worker for {} stopped with error: {}", queue, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Pulls jobs of one kind from its queue and runs them on a bounded pool
pub struct Worker {
    backend: Arc<dyn QueueBackend>,
    processor: Arc<dyn Processor>,
    config: QueueConfig,
}

impl Worker {
    pub fn new(backend: Arc<dyn QueueBackend>, processor: Arc<dyn Processor>, config: QueueConfig) -> Self {
        Self { backend, processor, config }
    }

    /// Start the worker loop on the runtime
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let queue = self.processor.kind().queue();
        let join_handle = tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            workers: vec![RunningWorker { queue, shutdown_tx, join_handle }],
        }
    }

    /// Run the worker loop
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) -> QueueResult<()> {
        let queue = self.processor.kind().queue();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut last_reap = Instant::now();

        info!("Worker started for queue {} with concurrency {}", queue, self.config.concurrency);

        loop {
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!("Job task on {} panicked: {}", queue, e);
                }
            }

            if last_reap.elapsed() >= self.config.heartbeat_interval {
                last_reap = Instant::now();
                match self.backend.reclaim_stalled(queue).await {
                    Ok(0) => {}
                    Ok(n) => info!("Reclaimed {} stalled jobs on {}", n, queue),
                    Err(e) => warn!("Error during stalled job check on {}: {}", queue, e),
                }
            }

            let permit = tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Worker shutdown requested for {}", queue);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| QueueError::WorkerShutdown)?
                }
            };

            match self.backend.dequeue(queue, self.config.lease_duration).await {
                Ok(Some(job)) => {
                    let backend = self.backend.clone();
                    let processor = self.processor.clone();
                    let lease = LeaseRenewal {
                        every: self.config.lease_heartbeat(),
                        duration: self.config.lease_duration,
                    };
                    in_flight.spawn(async move {
                        execute(backend, processor, job, lease).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            info!("Worker shutdown requested for {}", queue);
                            break;
                        }
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Error dequeuing from {}: {}", queue, e);
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!("Job task on {} panicked: {}", queue, e);
            }
        }

        info!("Worker stopped for queue {}", queue);
        Ok(())
    }
}

/// Renew a running job's lease to `duration` from now, every `every`
#[derive(Debug, Clone, Copy)]
struct LeaseRenewal {
    every: Duration,
    duration: Duration,
}

/// Run one attempt, keep its lease alive, and report the outcome to the backend
async fn execute(
    backend: Arc<dyn QueueBackend>,
    processor: Arc<dyn Processor>,
    job: LeasedJob,
    lease: LeaseRenewal,
) {
    let queue = job.record.queue.clone();
    let job_id = job.record.id.clone();
    let token = job.lease_token.clone();

    debug!(
        "Processing job {} of type {} (attempt {}/{})",
        job_id, job.record.kind, job.record.attempts_made, job.record.options.max_attempts
    );

    let result = {
        let process = processor.process(&job);
        tokio::pin!(process);
        let mut ticker = interval_at(Instant::now() + lease.every, lease.every);

        loop {
            tokio::select! {
                result = &mut process => break result,
                _ = ticker.tick() => {
                    if let Err(e) = backend.heartbeat_extend(&queue, &job_id, &token, lease.duration).await {
                        warn!("Failed to extend lease for job {}: {}", job_id, e);
                    }
                }
            }
        }
    };

    match result {
        Ok(output) => {
            let return_value = match output.to_value() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Could not serialize result of job {}: {}", job_id, e);
                    None
                }
            };

            match backend.ack_complete(&queue, &job_id, &token, return_value).await {
                Ok(()) => info!("Job {} completed successfully", job_id),
                Err(e) => error!("Failed to acknowledge completion of job {}: {}", job_id, e),
            }
        }
        Err(job_error) => {
            let permanent = !job_error.is_retryable();
            match backend.ack_fail(&queue, &job_id, &token, job_error.to_string(), permanent).await {
                Ok(JobStatus::Delayed { run_at }) => {
                    warn!("Job {} failed, will retry at {}: {}", job_id, run_at, job_error);
                }
                Ok(_) => {
                    error!(
                        "Job {} failed permanently after {} attempts: {}",
                        job_id, job.record.attempts_made, job_error
                    );
                }
                Err(e) => error!("Failed to acknowledge failure of job {}: {}", job_id, e),
            }
        }
    }
}
