//! Process readiness gate.
//!
//! Workers may start pulling jobs before the host process has finished its
//! bootstrap (connections, caches, registries). The gate starts out not
//! ready, flips to ready exactly once, and lets any number of workers wait
//! for that transition with a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::types::JobId;
use crate::NotReadyTimeout;

/// Default bound on how long a job waits for readiness
pub const DEFAULT_READY_MAX_WAIT: Duration = Duration::from_millis(60_000);

/// Shared readiness state. Cloning hands out another reference to the same gate.
#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    /// New gate in the not-ready state
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the process ready and wake every waiter. Idempotent.
    pub fn mark_ready(&self) {
        let changed = self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });

        if changed {
            info!("Application marked as ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate opens, or fail after `max_wait`
    pub async fn wait_until_ready(&self, max_wait: Duration) -> Result<(), NotReadyTimeout> {
        if self.is_ready() {
            return Ok(());
        }

        let mut rx = self.tx.subscribe();
        // A closed channel cannot happen while `self` holds the sender; treat it as a timeout
        let opened = matches!(
            tokio::time::timeout(max_wait, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );

        if opened {
            Ok(())
        } else {
            Err(NotReadyTimeout { waited: max_wait })
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Readiness wait shared by every processor
#[derive(Debug, Clone)]
pub struct ReadyGuard {
    gate: ReadinessGate,
    max_wait: Duration,
}

impl ReadyGuard {
    pub fn new(gate: ReadinessGate, max_wait: Duration) -> Self {
        Self { gate, max_wait }
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Block the current attempt until the process is ready
    pub async fn ensure_ready(&self, job_id: &JobId) -> Result<(), NotReadyTimeout> {
        if self.gate.is_ready() {
            return Ok(());
        }

        info!("Job {} waiting for application readiness", job_id);
        match self.gate.wait_until_ready(self.max_wait).await {
            Ok(()) => {
                info!("Application ready, continuing with job {}", job_id);
                Ok(())
            }
            Err(timeout) => {
                error!("Job {} gave up waiting for readiness: {}", job_id, timeout);
                Err(timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_ready_gate_returns_immediately() {
        let gate = ReadinessGate::new();
        gate.mark_ready();

        let started = tokio::time::Instant::now();
        gate.wait_until_ready(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_mark_ready() {
        let gate = ReadinessGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_until_ready(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!gate.is_ready());
        gate.mark_ready();

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let gate = ReadinessGate::new();
        let err = gate.wait_until_ready(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.waited, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_mark_ready_is_idempotent() {
        let gate = ReadinessGate::new();
        gate.mark_ready();
        gate.mark_ready();
        assert!(gate.is_ready());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_guard_logs_wait_and_continue() {
        let gate = ReadinessGate::new();
        let guard = ReadyGuard::new(gate.clone(), Duration::from_secs(5));
        let job_id = JobId::from("job-7");

        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.mark_ready();
        });

        guard.ensure_ready(&job_id).await.unwrap();
        opener.await.unwrap();

        assert!(logs_contain("Job job-7 waiting for application readiness"));
        assert!(logs_contain("Application ready, continuing with job job-7"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_guard_logs_timeout() {
        let guard = ReadyGuard::new(ReadinessGate::new(), Duration::from_millis(10));
        let result = guard.ensure_ready(&JobId::from("job-8")).await;

        assert!(result.is_err());
        assert!(logs_contain("gave up waiting for readiness"));
    }
}
