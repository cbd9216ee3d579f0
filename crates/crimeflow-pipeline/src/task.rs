//! Task trait and the context every task runs with.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crimeflow_frame::{read_csv_file, write_csv_file, Dataset};
use crimeflow_types::{Artifact, PipelineError, Result, RunId};

use crate::artifact::{artifact_path, ArtifactStore};
use crate::events::{EventEmitter, PipelineEvent};

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// Something a task reads or writes, as seen by graph validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Artifact(String),
    Table(String),
}

impl Resource {
    pub fn artifact(key: impl Into<String>) -> Self {
        Resource::Artifact(key.into())
    }

    pub fn table(name: impl Into<String>) -> Self {
        Resource::Table(name.into())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Artifact(key) => write!(f, "artifact '{key}'"),
            Resource::Table(name) => write!(f, "table '{name}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// Task trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Task: Send + Sync {
    /// Short type name used in logs and events (e.g. "extract", "load").
    fn kind(&self) -> &str;

    fn reads(&self) -> Vec<Resource> {
        Vec::new()
    }

    fn writes(&self) -> Vec<Resource> {
        Vec::new()
    }

    /// Execute one attempt. A retried task is called again from the start.
    async fn run(&self, ctx: &TaskContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Everything a running task may touch: its identity, the run's artifact store and the work
/// directory artifacts are written under.
#[derive(Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub task_id: String,
    pub artifacts: ArtifactStore,
    pub work_dir: PathBuf,
    events: EventEmitter,
}

impl TaskContext {
    pub fn new(
        run_id: RunId,
        task_id: impl Into<String>,
        artifacts: ArtifactStore,
        work_dir: impl Into<PathBuf>,
        events: EventEmitter,
    ) -> Self {
        Self {
            run_id,
            task_id: task_id.into(),
            artifacts,
            work_dir: work_dir.into(),
            events,
        }
    }

    /// Resolve `key` and read the dataset stored there.
    pub async fn load_dataset(&self, key: &str) -> Result<Dataset> {
        let artifact = self.artifacts.get(&self.run_id, key).await?;
        let location = artifact.location.clone();
        let dataset = tokio::task::spawn_blocking(move || read_csv_file(&location))
            .await
            .map_err(|e| PipelineError::Other(format!("reader task failed: {e}")))??;
        tracing::debug!(task = %self.task_id, key, rows = dataset.len(), "Artifact loaded");
        Ok(dataset)
    }

    /// Write `dataset` to this run's artifact directory and register it under `key`.
    pub async fn save_dataset(&self, key: &str, dataset: &Dataset) -> Result<Artifact> {
        let path = artifact_path(&self.work_dir, &self.run_id, key);
        let owned = dataset.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_csv_file(&owned, &target))
            .await
            .map_err(|e| PipelineError::Other(format!("writer task failed: {e}")))??;
        let artifact = self
            .artifacts
            .put(&self.run_id, key, path, &self.task_id)
            .await;
        tracing::info!(
            task = %self.task_id,
            key,
            rows = dataset.len(),
            path = %artifact.location.display(),
            "Artifact registered"
        );
        self.events.emit(PipelineEvent::ArtifactRegistered {
            task_id: self.task_id.clone(),
            key: key.to_string(),
            rows: dataset.len(),
        });
        Ok(artifact)
    }
}
