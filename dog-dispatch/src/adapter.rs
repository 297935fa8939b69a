use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    backend::QueueBackend,
    config::QueueConfig,
    effects::Effects,
    job::{Processor, ProcessorRegistry},
    processors::{BulkReplyProcessor, BulkThrottle, DataProcessor, EmailProcessor, ReplyProcessor},
    producer::Producer,
    readiness::{ReadinessGate, ReadyGuard},
    worker::{Worker, WorkerHandle},
    QueueResult,
};

/// Owns the backend, the readiness gate and the worker configuration.
/// Hands out producers and starts worker pools.
pub struct QueueAdapter<B: QueueBackend + 'static> {
    backend: Arc<B>,
    readiness: ReadinessGate,
    config: QueueConfig,
}

impl<B: QueueBackend + 'static> QueueAdapter<B> {
    /// Create a new queue adapter
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, QueueConfig::default())
    }

    /// Create adapter with custom configuration
    pub fn with_config(backend: B, config: QueueConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            readiness: ReadinessGate::new(),
            config,
        }
    }

    /// Share an existing readiness gate instead of a fresh one
    pub fn with_readiness(mut self, readiness: ReadinessGate) -> Self {
        self.readiness = readiness;
        self
    }

    fn dyn_backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.dyn_backend())
    }

    pub fn ready_guard(&self) -> ReadyGuard {
        ReadyGuard::new(self.readiness.clone(), self.config.ready_max_wait)
    }

    /// Registry with the four standard processors wired to `effects`
    pub fn standard_processors(&self, effects: Effects) -> QueueResult<ProcessorRegistry> {
        let throttle = BulkThrottle {
            every: self.config.bulk_throttle_every,
            pause: self.config.bulk_throttle_pause,
        };

        let mut registry = ProcessorRegistry::new();
        registry.register(EmailProcessor::new(self.ready_guard(), effects.email))?;
        registry.register(DataProcessor::new(self.ready_guard(), effects.data))?;
        registry.register(ReplyProcessor::new(self.ready_guard(), effects.reply))?;
        registry.register(BulkReplyProcessor::new(self.ready_guard(), self.producer()).with_throttle(throttle))?;
        Ok(registry)
    }

    /// Start one worker pool per registered processor
    #[instrument(skip(self, registry), fields(kinds = ?registry.kinds()))]
    pub fn start_workers(&self, registry: &ProcessorRegistry) -> WorkerHandle {
        registry
            .kinds()
            .into_iter()
            .filter_map(|kind| registry.get(kind))
            .map(|processor| self.start_worker(processor))
            .fold(WorkerHandle::empty(), WorkerHandle::merge)
    }

    /// Start a worker pool for a single processor
    pub fn start_worker(&self, processor: Arc<dyn Processor>) -> WorkerHandle {
        info!("Starting worker for {}", processor.kind().queue());
        Worker::new(self.dyn_backend(), processor, self.config.clone()).spawn()
    }

    /// Get backend reference
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn readiness(&self) -> &ReadinessGate {
        &self.readiness
    }

    /// Get configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl<B: QueueBackend + 'static> Clone for QueueAdapter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            readiness: self.readiness.clone(),
            config: self.config.clone(),
        }
    }
}
