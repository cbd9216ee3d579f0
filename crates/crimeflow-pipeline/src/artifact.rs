//! Run-scoped artifact registry.
//!
//! Tasks never hand datasets to each other directly: a producer writes a CSV file and registers
//! its location under a key, a consumer resolves the key back to a location. Registrations are
//! scoped by [`RunId`], so two runs sharing a store never see each other's artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crimeflow_types::{Artifact, PipelineError, Result, RunId};

/// Cloneable handle to a shared artifact map.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    inner: Arc<tokio::sync::RwLock<HashMap<(RunId, String), Artifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `location` for `key` within `run_id`. An existing registration is replaced and a
    /// warning is logged.
    pub async fn put(
        &self,
        run_id: &RunId,
        key: &str,
        location: impl Into<PathBuf>,
        produced_by: &str,
    ) -> Artifact {
        let artifact = Artifact {
            key: key.to_string(),
            location: location.into(),
            produced_by: produced_by.to_string(),
            run_id: run_id.clone(),
        };
        let previous = self
            .inner
            .write()
            .await
            .insert((run_id.clone(), key.to_string()), artifact.clone());
        if let Some(prev) = previous {
            tracing::warn!(
                run_id = %run_id,
                key,
                previous_producer = %prev.produced_by,
                producer = produced_by,
                "Artifact overwritten"
            );
        }
        artifact
    }

    /// Resolve `key` within `run_id`.
    pub async fn get(&self, run_id: &RunId, key: &str) -> Result<Artifact> {
        self.inner
            .read()
            .await
            .get(&(run_id.clone(), key.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::NotFound {
                run_id: run_id.to_string(),
                key: key.to_string(),
            })
    }

    /// Every artifact registered for `run_id`, sorted by key.
    pub async fn list(&self, run_id: &RunId) -> Vec<Artifact> {
        let mut artifacts: Vec<Artifact> = self
            .inner
            .read()
            .await
            .iter()
            .filter(|((run, _), _)| run == run_id)
            .map(|(_, a)| a.clone())
            .collect();
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        artifacts
    }

    /// Forget every registration of `run_id`. Files on disk are left alone.
    pub async fn clear_run(&self, run_id: &RunId) {
        self.inner.write().await.retain(|(run, _), _| run != run_id);
    }
}

/// Where the artifact `key` of `run_id` lives under `work_dir`.
pub fn artifact_path(work_dir: &Path, run_id: &RunId, key: &str) -> PathBuf {
    work_dir.join(run_id.as_str()).join(format!("{key}.csv"))
}
