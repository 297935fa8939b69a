use std::collections::HashMap;
use std::sync::Arc;

use crate::{job::Processor, JobKind, QueueError, QueueResult};

/// Registry mapping each job kind to its processor
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor; a kind can only be registered once
    pub fn register<P: Processor + 'static>(&mut self, processor: P) -> QueueResult<()> {
        self.register_arc(Arc::new(processor))
    }

    pub fn register_arc(&mut self, processor: Arc<dyn Processor>) -> QueueResult<()> {
        let kind = processor.kind();
        if self.processors.contains_key(&kind) {
            return Err(QueueError::ProcessorAlreadyRegistered(kind.to_string()));
        }

        self.processors.insert(kind, processor);
        Ok(())
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Processor>> {
        self.processors.get(&kind).cloned()
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::all()
            .iter()
            .copied()
            .filter(|kind| self.processors.contains_key(kind))
            .collect()
    }
}
