//! Pipeline execution engine: walks the task graph in dependency order, runs each task under the
//! retry policy and records every state transition.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use crimeflow_types::{PipelineError, Result, RunId, RunStatus, TaskStatus};

use crate::artifact::ArtifactStore;
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::TaskGraph;
use crate::retry::{execute_with_retry, Attempt, BackoffPolicy, RetryPolicy};
use crate::task::TaskContext;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Settings for one executor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Artifacts are written under `<work_dir>/<run_id>/`.
    pub work_dir: PathBuf,
    /// Maximum number of tasks running at once.
    pub max_parallel: usize,
    /// Retries per task after the first attempt, unless the task overrides it.
    pub retries: usize,
    pub backoff: BackoffPolicy,
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".crimeflow/runs"),
            max_parallel: 1,
            retries: 3,
            backoff: BackoffPolicy::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub kind: String,
    pub status: TaskStatus,
    pub attempts: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub task_id: String,
    pub error: String,
}

/// Outcome of one run. A failing task makes the run `Failed`; it is not an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub status: RunStatus,
    /// In execution order.
    pub tasks: Vec<TaskReport>,
    pub transitions: Vec<Transition>,
    /// The first task to fail.
    pub failed_task: Option<FailedTask>,
    /// Tasks left `Pending` because an upstream task failed.
    pub blocked: Vec<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id == id)
    }

    /// Every state `id` passed through, starting from `Pending`.
    pub fn history(&self, id: &str) -> Vec<TaskStatus> {
        let mut states = vec![TaskStatus::Pending];
        states.extend(
            self.transitions
                .iter()
                .filter(|t| t.task_id == id)
                .map(|t| t.to),
        );
        states
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

// ---------------------------------------------------------------------------
// State tracking
// ---------------------------------------------------------------------------

/// Current status of every task plus the transition log, shared with running tasks.
#[derive(Clone)]
struct StateBook {
    inner: Arc<Mutex<BookInner>>,
}

struct BookInner {
    status: HashMap<String, TaskStatus>,
    transitions: Vec<Transition>,
}

impl StateBook {
    fn new<'a>(ids: impl Iterator<Item = &'a str>) -> Self {
        let status = ids.map(|id| (id.to_string(), TaskStatus::Pending)).collect();
        Self {
            inner: Arc::new(Mutex::new(BookInner {
                status,
                transitions: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BookInner> {
        // A poisoned book only means a task panicked mid-update; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, task_id: &str, to: TaskStatus) {
        let mut inner = self.lock();
        let from = inner
            .status
            .insert(task_id.to_string(), to)
            .unwrap_or(TaskStatus::Pending);
        tracing::debug!(task = %task_id, %from, %to, "Task state changed");
        inner.transitions.push(Transition {
            task_id: task_id.to_string(),
            from,
            to,
            at: Utc::now(),
        });
    }

    fn get(&self, task_id: &str) -> TaskStatus {
        self.lock()
            .status
            .get(task_id)
            .copied()
            .unwrap_or(TaskStatus::Pending)
    }

    fn transitions(&self) -> Vec<Transition> {
        self.lock().transitions.clone()
    }
}

struct Finished {
    task_id: String,
    result: Result<()>,
    attempts: usize,
    duration_ms: u64,
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Drives a [`TaskGraph`] to completion.
pub struct PipelineExecutor {
    config: EngineConfig,
    artifacts: ArtifactStore,
    events: EventEmitter,
}

impl PipelineExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            artifacts: ArtifactStore::new(),
            events: EventEmitter::default(),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Validate `graph` and run it once under `run_id`.
    ///
    /// Returns `Err` only when the run cannot be carried out at all (invalid graph, a task
    /// panicking). Task failures are reported through [`RunReport::status`].
    pub async fn run(&self, graph: &TaskGraph, run_id: RunId) -> Result<RunReport> {
        validate_or_raise(graph)?;

        let started = Instant::now();
        let order: Vec<String> = graph
            .execution_order()
            .into_iter()
            .map(String::from)
            .collect();
        let book = StateBook::new(order.iter().map(String::as_str));
        let max_parallel = self.config.max_parallel.max(1);

        tracing::info!(
            pipeline = %graph.name,
            run_id = %run_id,
            tasks = order.len(),
            max_parallel,
            "Run started"
        );
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            pipeline_name: graph.name.clone(),
            task_count: order.len(),
        });

        let mut join_set: JoinSet<Finished> = JoinSet::new();
        let mut launched: HashSet<String> = HashSet::new();
        let mut outcomes: HashMap<String, (usize, Option<String>, u64)> = HashMap::new();
        let mut failed_task: Option<FailedTask> = None;

        loop {
            for id in &order {
                if join_set.len() >= max_parallel {
                    break;
                }
                if launched.contains(id) {
                    continue;
                }
                let ready = graph
                    .predecessors(id)
                    .iter()
                    .all(|p| book.get(p) == TaskStatus::Succeeded);
                if !ready {
                    continue;
                }
                launched.insert(id.clone());
                join_set.spawn(self.attempt_task(graph, id, &run_id, book.clone())?);
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let finished = joined
                .map_err(|e| PipelineError::Other(format!("task runner aborted: {e}")))?;
            let error = match finished.result {
                Ok(()) => {
                    book.set(&finished.task_id, TaskStatus::Succeeded);
                    tracing::info!(
                        task = %finished.task_id,
                        attempts = finished.attempts,
                        duration_ms = finished.duration_ms,
                        "Task succeeded"
                    );
                    self.events.emit(PipelineEvent::TaskSucceeded {
                        task_id: finished.task_id.clone(),
                        attempts: finished.attempts,
                        duration_ms: finished.duration_ms,
                    });
                    None
                }
                Err(e) => {
                    book.set(&finished.task_id, TaskStatus::Failed);
                    let message = e.to_string();
                    self.events.emit(PipelineEvent::TaskFailed {
                        task_id: finished.task_id.clone(),
                        attempts: finished.attempts,
                        error: message.clone(),
                    });
                    if failed_task.is_none() {
                        failed_task = Some(FailedTask {
                            task_id: finished.task_id.clone(),
                            error: message.clone(),
                        });
                    }
                    Some(message)
                }
            };
            outcomes.insert(
                finished.task_id,
                (finished.attempts, error, finished.duration_ms),
            );
        }

        let tasks: Vec<TaskReport> = order
            .iter()
            .map(|id| {
                let (attempts, error, duration_ms) =
                    outcomes.remove(id).unwrap_or((0, None, 0));
                TaskReport {
                    task_id: id.clone(),
                    kind: graph
                        .node(id)
                        .map(|n| n.task.kind().to_string())
                        .unwrap_or_default(),
                    status: book.get(id),
                    attempts,
                    error,
                    duration_ms,
                }
            })
            .collect();
        let blocked: Vec<String> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.task_id.clone())
            .collect();
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = match &failed_task {
            None => {
                tracing::info!(pipeline = %graph.name, run_id = %run_id, duration_ms, "Run succeeded");
                self.events.emit(PipelineEvent::RunCompleted {
                    run_id: run_id.to_string(),
                    pipeline_name: graph.name.clone(),
                    duration_ms,
                });
                RunStatus::Succeeded
            }
            Some(f) => {
                tracing::error!(
                    pipeline = %graph.name,
                    run_id = %run_id,
                    failed_task = %f.task_id,
                    blocked = blocked.len(),
                    error = %f.error,
                    "Run failed"
                );
                self.events.emit(PipelineEvent::RunFailed {
                    run_id: run_id.to_string(),
                    pipeline_name: graph.name.clone(),
                    failed_task: f.task_id.clone(),
                    error: f.error.clone(),
                });
                RunStatus::Failed
            }
        };

        Ok(RunReport {
            run_id,
            pipeline: graph.name.clone(),
            status,
            tasks,
            transitions: book.transitions(),
            failed_task,
            blocked,
            duration_ms,
        })
    }

    /// Build the future that runs one task through all of its attempts.
    fn attempt_task(
        &self,
        graph: &TaskGraph,
        task_id: &str,
        run_id: &RunId,
        book: StateBook,
    ) -> Result<impl std::future::Future<Output = Finished> + Send + 'static> {
        let node = graph
            .node(task_id)
            .ok_or_else(|| PipelineError::Other(format!("task '{task_id}' vanished from the graph")))?;
        let task = node.task.clone();
        let budget = node.retries.unwrap_or(self.config.retries);
        let policy = self.config.retry_policy.clone();
        let backoff = self.config.backoff.clone();
        let events = self.events.clone();
        let ctx = TaskContext::new(
            run_id.clone(),
            task_id,
            self.artifacts.clone(),
            self.config.work_dir.clone(),
            self.events.clone(),
        );
        let task_id = task_id.to_string();

        Ok(async move {
            let started = Instant::now();
            let kind = task.kind().to_string();
            let (result, attempts) = execute_with_retry(
                |_| task.run(&ctx),
                budget,
                &policy,
                &backoff,
                &task_id,
                |attempt| match attempt {
                    Attempt::Started { attempt } => {
                        book.set(&task_id, TaskStatus::Running);
                        tracing::info!(task = %task_id, kind = %kind, attempt, "Task started");
                        events.emit(PipelineEvent::TaskStarted {
                            task_id: task_id.clone(),
                            kind: kind.clone(),
                            attempt,
                        });
                    }
                    Attempt::Retrying {
                        attempt,
                        delay,
                        error,
                    } => {
                        book.set(&task_id, TaskStatus::UpForRetry);
                        events.emit(PipelineEvent::TaskRetrying {
                            task_id: task_id.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            error: error.to_string(),
                        });
                    }
                },
            )
            .await;
            Finished {
                task_id,
                result,
                attempts,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Resource, Task};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails with a transient error for its first `failures` attempts.
    struct Flaky {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Flaky {
        fn kind(&self) -> &str {
            "flaky"
        }
        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(PipelineError::SourceUnavailable {
                    source_ref: "test".into(),
                    message: "HTTP 503".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Task for Broken {
        fn kind(&self) -> &str {
            "broken"
        }
        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            Err(PipelineError::missing_column("SHOOTING"))
        }
    }

    /// Sleeps, tracking how many instances run at once.
    struct Slow {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Slow {
        fn kind(&self) -> &str {
            "slow"
        }
        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Writes one artifact.
    struct Produce(&'static str);

    #[async_trait]
    impl Task for Produce {
        fn kind(&self) -> &str {
            "produce"
        }
        fn writes(&self) -> Vec<Resource> {
            vec![Resource::artifact(self.0)]
        }
        async fn run(&self, ctx: &TaskContext) -> Result<()> {
            let ds = crimeflow_frame::Dataset::new(["a"])?;
            ctx.save_dataset(self.0, &ds).await?;
            Ok(())
        }
    }

    fn executor(dir: &std::path::Path, retries: usize) -> PipelineExecutor {
        PipelineExecutor::new(EngineConfig {
            work_dir: dir.to_path_buf(),
            retries,
            backoff: BackoffPolicy::None,
            ..EngineConfig::default()
        })
    }

    fn run_id() -> RunId {
        RunId::new("test_run").unwrap()
    }

    #[tokio::test]
    async fn retried_task_walks_the_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = TaskGraph::builder("retry")
            .task(
                "extract_weather",
                Flaky {
                    failures: 2,
                    calls: calls.clone(),
                },
            )
            .build()
            .unwrap();

        let report = executor(dir.path(), 3).run(&graph, run_id()).await.unwrap();
        assert!(report.succeeded());
        use TaskStatus::*;
        assert_eq!(
            report.history("extract_weather"),
            vec![Pending, Running, UpForRetry, Running, UpForRetry, Running, Succeeded]
        );
        assert_eq!(report.task("extract_weather").unwrap().attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TaskGraph::builder("retry")
            .task(
                "extract_weather",
                Flaky {
                    failures: 10,
                    calls: Arc::new(AtomicUsize::new(0)),
                },
            )
            .build()
            .unwrap();
        let report = executor(dir.path(), 2).run(&graph, run_id()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        let t = report.task("extract_weather").unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.attempts, 3);
        assert!(t.error.as_deref().unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn successor_of_failed_task_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = TaskGraph::builder("blocked")
            .task("clean_crimes", Broken)
            .task(
                "derive_offense",
                Flaky {
                    failures: 0,
                    calls: calls.clone(),
                },
            )
            .edge("clean_crimes", "derive_offense")
            .build()
            .unwrap();

        let report = executor(dir.path(), 3).run(&graph, run_id()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.history("derive_offense"), vec![TaskStatus::Pending]);
        assert_eq!(report.blocked, vec!["derive_offense"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let failed = report.failed_task.as_ref().unwrap();
        assert_eq!(failed.task_id, "clean_crimes");
        assert_eq!(failed.error, "Missing column 'SHOOTING'");
        // Schema errors are not retried under the default policy.
        assert_eq!(report.task("clean_crimes").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn independent_branch_still_runs_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = TaskGraph::builder("branches")
            .task("a", Broken)
            .task("b", Flaky { failures: 0, calls: calls.clone() })
            .task("c", Flaky { failures: 0, calls: calls.clone() })
            .edge("a", "c")
            .edge("b", "c")
            .build()
            .unwrap();
        let report = executor(dir.path(), 0).run(&graph, run_id()).await.unwrap();
        assert_eq!(report.task("b").unwrap().status, TaskStatus::Succeeded);
        assert_eq!(report.blocked, vec!["c"]);
    }

    #[tokio::test]
    async fn sequential_by_default_parallel_when_allowed() {
        for (max_parallel, expected_peak) in [(1, 1), (3, 3)] {
            let dir = tempfile::tempdir().unwrap();
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let slow = || Slow {
                active: active.clone(),
                peak: peak.clone(),
            };
            let graph = TaskGraph::builder("dims")
                .task("clean_crimes", Produce("crimes_clean"))
                .task("derive_offense", slow())
                .task("derive_location", slow())
                .task("derive_district", slow())
                .edge("clean_crimes", "derive_offense")
                .edge("clean_crimes", "derive_location")
                .edge("clean_crimes", "derive_district")
                .build()
                .unwrap();
            let exec = PipelineExecutor::new(EngineConfig {
                work_dir: dir.path().to_path_buf(),
                max_parallel,
                backoff: BackoffPolicy::None,
                ..EngineConfig::default()
            });
            let report = exec.run(&graph, run_id()).await.unwrap();
            assert!(report.succeeded());
            assert_eq!(peak.load(Ordering::SeqCst), expected_peak);
        }
    }

    #[tokio::test]
    async fn no_task_starts_before_its_predecessors_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = TaskGraph::builder("order")
            .task("extract", Flaky { failures: 1, calls: calls.clone() })
            .task("transform", Flaky { failures: 0, calls: Arc::new(AtomicUsize::new(0)) })
            .edge("extract", "transform")
            .build()
            .unwrap();
        let exec = PipelineExecutor::new(EngineConfig {
            work_dir: dir.path().to_path_buf(),
            max_parallel: 4,
            backoff: BackoffPolicy::None,
            ..EngineConfig::default()
        });
        let report = exec.run(&graph, run_id()).await.unwrap();

        let pos = |id: &str, to: TaskStatus| {
            report
                .transitions
                .iter()
                .position(|t| t.task_id == id && t.to == to)
                .unwrap()
        };
        assert!(pos("extract", TaskStatus::Succeeded) < pos("transform", TaskStatus::Running));
    }

    #[tokio::test]
    async fn per_task_retry_override() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TaskGraph::builder("override")
            .task_with_retries(
                "load_offense",
                Flaky {
                    failures: 1,
                    calls: Arc::new(AtomicUsize::new(0)),
                },
                0,
            )
            .build()
            .unwrap();
        let report = executor(dir.path(), 3).run(&graph, run_id()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.task("load_offense").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn events_trace_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let graph = TaskGraph::builder("events")
            .task("extract_crimes", Produce("crimes_raw"))
            .build()
            .unwrap();
        let exec = executor(dir.path(), 0);
        let mut rx = exec.events().subscribe();
        exec.run(&graph, run_id()).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(match event {
                PipelineEvent::RunStarted { .. } => "run_started",
                PipelineEvent::TaskStarted { .. } => "task_started",
                PipelineEvent::ArtifactRegistered { .. } => "artifact",
                PipelineEvent::TaskSucceeded { .. } => "task_succeeded",
                PipelineEvent::RunCompleted { .. } => "run_completed",
                _ => "other",
            });
        }
        assert_eq!(
            names,
            vec!["run_started", "task_started", "artifact", "task_succeeded", "run_completed"]
        );
        let artifact = exec.artifacts().get(&run_id(), "crimes_raw").await.unwrap();
        assert!(artifact.location.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn invalid_graph_is_an_error() {
        struct Reader;
        #[async_trait]
        impl Task for Reader {
            fn kind(&self) -> &str {
                "reader"
            }
            fn reads(&self) -> Vec<Resource> {
                vec![Resource::artifact("nowhere")]
            }
            async fn run(&self, _ctx: &TaskContext) -> Result<()> {
                Ok(())
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let graph = TaskGraph::builder("bad").task("r", Reader).build().unwrap();
        let err = executor(dir.path(), 0).run(&graph, run_id()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ValidationError(_)));
    }
}
