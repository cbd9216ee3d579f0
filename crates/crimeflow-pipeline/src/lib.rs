//! Task graph, orchestrator, extractors, transform chains and loader for the crimeflow batch
//! pipeline.
//!
//! A run walks a fixed [`TaskGraph`] in dependency order. Tasks hand datasets to each other
//! through the run-scoped [`ArtifactStore`]; failures are retried according to the
//! [`RetryPolicy`] and reported in the [`RunReport`].

pub mod artifact;
pub mod boston;
pub mod config;
pub mod engine;
pub mod events;
pub mod extract;
pub mod graph;
pub mod load;
pub mod retry;
pub mod task;
pub mod transform;
pub mod validation;

pub use artifact::{artifact_path, ArtifactStore};
pub use boston::{boston_graph, graph_from_config, BostonSources};
pub use config::{PipelineConfig, RetryConfig, SourceConfig, SourcesConfig};
pub use engine::{EngineConfig, PipelineExecutor, RunReport, TaskReport, Transition};
pub use events::{EventEmitter, PipelineEvent};
pub use extract::{ExtractTask, Extractor};
pub use graph::{TaskGraph, TaskGraphBuilder, TaskNode};
pub use load::{ConstrainTask, LoadTask, Loader, SqliteLoader};
pub use retry::{execute_with_retry, BackoffPolicy, RetryPolicy, RetryPolicyName, RetryRule};
pub use task::{Resource, Task, TaskContext};
pub use transform::TransformTask;
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
