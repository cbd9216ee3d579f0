//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, progress printers, tests) can follow a run
//! without coupling to the engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        pipeline_name: String,
        task_count: usize,
    },
    RunCompleted {
        run_id: String,
        pipeline_name: String,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        pipeline_name: String,
        failed_task: String,
        error: String,
    },
    TaskStarted {
        task_id: String,
        kind: String,
        attempt: usize,
    },
    TaskSucceeded {
        task_id: String,
        attempts: usize,
        duration_ms: u64,
    },
    TaskRetrying {
        task_id: String,
        attempt: usize,
        delay_ms: u64,
        error: String,
    },
    TaskFailed {
        task_id: String,
        attempts: usize,
        error: String,
    },
    ArtifactRegistered {
        task_id: String,
        key: String,
        rows: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
