//! Loading: artifacts into sink tables, then cross-table constraints once every table is in.

pub mod schema;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crimeflow_frame::Value;
use crimeflow_types::Result;

use crate::task::{Resource, Task, TaskContext};

pub use sqlite::SqliteLoader;

// ---------------------------------------------------------------------------
// Loader trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Loader: Send + Sync {
    /// Replace `table` with `rows`, whose values follow `columns`. All-or-nothing: on error the
    /// table does not exist afterwards. Returns the number of rows written.
    async fn load(&self, table: &str, columns: &[String], rows: Vec<Vec<Value>>) -> Result<u64>;

    /// Enforce the table's primary key and foreign keys. Referenced tables must be loaded.
    async fn apply_constraints(&self, table: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Loads one artifact into one table.
pub struct LoadTask {
    artifact: String,
    table: String,
    loader: Arc<dyn Loader>,
}

impl LoadTask {
    pub fn new(artifact: impl Into<String>, table: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        Self {
            artifact: artifact.into(),
            table: table.into(),
            loader,
        }
    }
}

#[async_trait]
impl Task for LoadTask {
    fn kind(&self) -> &str {
        "load"
    }

    fn reads(&self) -> Vec<Resource> {
        vec![Resource::artifact(&self.artifact)]
    }

    fn writes(&self) -> Vec<Resource> {
        vec![Resource::table(&self.table)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let dataset = ctx.load_dataset(&self.artifact).await?;
        let columns = dataset.columns();
        let rows = self.loader.load(&self.table, &columns, dataset.into_rows()).await?;
        tracing::info!(task = %ctx.task_id, table = %self.table, rows, "Artifact loaded into sink");
        Ok(())
    }
}

/// Applies a table's constraints. Reads the table itself and every table its foreign keys point
/// at, so graph validation requires all of them to be loaded upstream.
pub struct ConstrainTask {
    table: String,
    references: Vec<String>,
    loader: Arc<dyn Loader>,
}

impl ConstrainTask {
    pub fn new(table: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        let table = table.into();
        let references = schema::table(&table)
            .map(|s| s.referenced_tables().into_iter().map(String::from).collect())
            .unwrap_or_default();
        Self {
            table,
            references,
            loader,
        }
    }
}

#[async_trait]
impl Task for ConstrainTask {
    fn kind(&self) -> &str {
        "constrain"
    }

    fn reads(&self) -> Vec<Resource> {
        std::iter::once(&self.table)
            .chain(&self.references)
            .map(Resource::table)
            .collect()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        tracing::debug!(task = %ctx.task_id, table = %self.table, "Applying constraints");
        self.loader.apply_constraints(&self.table).await
    }
}
