//! Shared types, errors, run identity and task status for the crimeflow pipeline.
//!
//! This crate provides the foundational types used across all other crimeflow crates:
//! - `PipelineError`: unified error taxonomy, with [`ErrorKind`] for retry decisions
//! - `RunId`: identity of one pipeline run, used to scope artifacts
//! - `Artifact`: run-scoped reference to a persisted dataset
//! - `TaskStatus` / `RunStatus`: orchestrator state machine

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unified error type for all crimeflow subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // === Extraction Errors ===
    #[error("Source '{source_ref}' unavailable: {message}")]
    SourceUnavailable { source_ref: String, message: String },

    #[error("Source '{source_ref}' is not valid tabular data: {message}")]
    SourceFormatError { source_ref: String, message: String },

    // === Transform Errors ===
    #[error("Missing column '{column}'")]
    MissingColumn { column: String },

    #[error("Column '{column}' already exists")]
    ColumnConflict { column: String },

    #[error("Cannot parse date '{value}' in column '{column}' at row {row}")]
    DateParseError {
        column: String,
        value: String,
        row: usize,
    },

    // === Artifact Errors ===
    #[error("Artifact '{key}' not found for run '{run_id}'")]
    NotFound { run_id: String, key: String },

    // === Sink Errors ===
    #[error("Load into table '{table}' failed: {message}")]
    LoadError { table: String, message: String },

    // === Graph Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`PipelineError`], used as the key of retry policy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    SourceFormat,
    MissingColumn,
    ColumnConflict,
    DateParse,
    NotFound,
    Load,
    Validation,
    Io,
    Serialization,
    Other,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::SourceUnavailable,
        ErrorKind::SourceFormat,
        ErrorKind::MissingColumn,
        ErrorKind::ColumnConflict,
        ErrorKind::DateParse,
        ErrorKind::NotFound,
        ErrorKind::Load,
        ErrorKind::Validation,
        ErrorKind::Io,
        ErrorKind::Serialization,
        ErrorKind::Other,
    ];

    /// Transport, sink and I/O failures may succeed on a later attempt; schema and parse errors
    /// will not.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::SourceUnavailable | ErrorKind::Load | ErrorKind::Io
        )
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            PipelineError::SourceFormatError { .. } => ErrorKind::SourceFormat,
            PipelineError::MissingColumn { .. } => ErrorKind::MissingColumn,
            PipelineError::ColumnConflict { .. } => ErrorKind::ColumnConflict,
            PipelineError::DateParseError { .. } => ErrorKind::DateParse,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::LoadError { .. } => ErrorKind::Load,
            PipelineError::ValidationError(_) => ErrorKind::Validation,
            PipelineError::Io(_) => ErrorKind::Io,
            PipelineError::Json(_) => ErrorKind::Serialization,
            PipelineError::Other(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for [`PipelineError::MissingColumn`].
    pub fn missing_column(column: impl Into<String>) -> Self {
        PipelineError::MissingColumn {
            column: column.into(),
        }
    }
}

/// A convenience alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// RunId: identity of one pipeline run
// ---------------------------------------------------------------------------

/// Identity of one pipeline run. Artifact keys and artifact directories are scoped by it, so the
/// value must be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Validate and wrap a caller-supplied run id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+'));
        if !valid {
            return Err(PipelineError::ValidationError(format!(
                "invalid run id '{id}': use letters, digits and - _ . : +"
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh run id of the form `manual__<utc timestamp>_<8 hex>`.
    pub fn generate() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("manual__{stamp}_{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Artifact: run-scoped reference to a persisted dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: String,
    pub location: PathBuf,
    pub produced_by: String,
    pub run_id: RunId,
}

// ---------------------------------------------------------------------------
// TaskStatus / RunStatus: orchestrator state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    /// An attempt failed and another attempt is scheduled after the retry delay.
    UpForRetry,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::UpForRetry => "up_for_retry",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}
