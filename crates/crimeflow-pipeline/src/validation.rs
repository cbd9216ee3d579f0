//! Pipeline validation: lint rules and diagnostics.
//!
//! The built-in rules check that resources flow through the graph the way the
//! task declarations say they do. Call [`validate`] for advisory diagnostics
//! or [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::collections::HashMap;

use crimeflow_types::{PipelineError, Result};

use crate::graph::TaskGraph;
use crate::task::Resource;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub task_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &TaskGraph) -> Vec<Diagnostic>;
}

/// Map every written resource to the tasks writing it, in declaration order.
fn writers(graph: &TaskGraph) -> HashMap<Resource, Vec<String>> {
    let mut writers: HashMap<Resource, Vec<String>> = HashMap::new();
    for node in graph.nodes() {
        for resource in node.task.writes() {
            writers.entry(resource).or_default().push(node.id.clone());
        }
    }
    writers
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Every resource a task reads must be written by one of its ancestors, so it is in place by the
/// time the task starts.
struct ResourceProducedUpstreamRule;
impl LintRule for ResourceProducedUpstreamRule {
    fn name(&self) -> &str {
        "resource_produced_upstream"
    }
    fn apply(&self, graph: &TaskGraph) -> Vec<Diagnostic> {
        let writers = writers(graph);
        let mut diags = Vec::new();
        for node in graph.nodes() {
            let ancestors = graph.ancestors(&node.id);
            for resource in node.task.reads() {
                let producers = writers.get(&resource).map(Vec::as_slice).unwrap_or(&[]);
                if producers.iter().any(|p| ancestors.contains(p.as_str())) {
                    continue;
                }
                let (message, fix) = match producers.first() {
                    None => (
                        format!("Task '{}' reads {resource}, which no task writes", node.id),
                        None,
                    ),
                    Some(p) => (
                        format!(
                            "Task '{}' reads {resource}, but its writer '{p}' is not upstream",
                            node.id
                        ),
                        Some(format!("Add an edge {p} -> {}", node.id)),
                    ),
                };
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message,
                    task_id: Some(node.id.clone()),
                    fix,
                });
            }
        }
        diags
    }
}

struct SingleWriterRule;
impl LintRule for SingleWriterRule {
    fn name(&self) -> &str {
        "single_writer"
    }
    fn apply(&self, graph: &TaskGraph) -> Vec<Diagnostic> {
        let mut multi: Vec<(Resource, Vec<String>)> = writers(graph)
            .into_iter()
            .filter(|(_, w)| w.len() > 1)
            .collect();
        multi.sort();
        multi
            .into_iter()
            .map(|(resource, w)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("{resource} is written by {} tasks: {}", w.len(), w.join(", ")),
                task_id: w.get(1).cloned(),
                fix: Some("Give each task its own artifact key or table".into()),
            })
            .collect()
    }
}

struct IsolatedTaskRule;
impl LintRule for IsolatedTaskRule {
    fn name(&self) -> &str {
        "isolated_task"
    }
    fn apply(&self, graph: &TaskGraph) -> Vec<Diagnostic> {
        if graph.len() < 2 {
            return Vec::new();
        }
        graph
            .nodes()
            .filter(|n| graph.predecessors(&n.id).is_empty() && graph.successors(&n.id).is_empty())
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Task '{}' has no dependencies and no dependents", n.id),
                task_id: Some(n.id.clone()),
                fix: None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(ResourceProducedUpstreamRule),
        Box::new(SingleWriterRule),
        Box::new(IsolatedTaskRule),
    ]
}

/// Run the built-in rules plus any `extra_rules`.
pub fn validate(graph: &TaskGraph, extra_rules: &[Box<dyn LintRule>]) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = built_in_rules()
        .iter()
        .flat_map(|r| r.apply(graph))
        .collect();
    for rule in extra_rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Validate and fail with `ValidationError` on the first error. Warnings are logged.
pub fn validate_or_raise(graph: &TaskGraph) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph, &[]);
    if let Some(err) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        return Err(PipelineError::ValidationError(format!(
            "[{}] {}",
            err.rule, err.message
        )));
    }
    for d in &diagnostics {
        tracing::warn!(rule = %d.rule, task = ?d.task_id, "{}", d.message);
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskContext};
    use async_trait::async_trait;

    struct Declared {
        reads: Vec<Resource>,
        writes: Vec<Resource>,
    }

    fn io(reads: &[&str], writes: &[&str]) -> Declared {
        Declared {
            reads: reads.iter().map(|k| Resource::artifact(*k)).collect(),
            writes: writes.iter().map(|k| Resource::artifact(*k)).collect(),
        }
    }

    #[async_trait]
    impl Task for Declared {
        fn kind(&self) -> &str {
            "declared"
        }
        fn reads(&self) -> Vec<Resource> {
            self.reads.clone()
        }
        fn writes(&self) -> Vec<Resource> {
            self.writes.clone()
        }
        async fn run(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }
    }

    fn rules_hit(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.rule.as_str()).collect()
    }

    #[test]
    fn well_formed_graph_is_clean() {
        let graph = TaskGraph::builder("ok")
            .task("extract", io(&[], &["raw"]))
            .task("clean", io(&["raw"], &["clean"]))
            .chain(&["extract", "clean"])
            .build()
            .unwrap();
        assert!(validate(&graph, &[]).is_empty());
        assert!(validate_or_raise(&graph).is_ok());
    }

    #[test]
    fn read_without_upstream_writer() {
        let graph = TaskGraph::builder("bad")
            .task("clean", io(&["raw"], &["clean"]))
            .task("extract", io(&[], &["raw"]))
            .task("other", io(&[], &[]))
            .chain(&["other", "clean"])
            .build()
            .unwrap();
        let diags = validate(&graph, &[]);
        let d = diags
            .iter()
            .find(|d| d.rule == "resource_produced_upstream")
            .unwrap();
        assert_eq!(d.task_id.as_deref(), Some("clean"));
        assert_eq!(d.fix.as_deref(), Some("Add an edge extract -> clean"));

        let err = validate_or_raise(&graph).unwrap_err();
        assert!(err.to_string().contains("resource_produced_upstream"));
    }

    #[test]
    fn read_with_no_writer_at_all() {
        let graph = TaskGraph::builder("bad")
            .task("clean", io(&["raw"], &[]))
            .build()
            .unwrap();
        let diags = validate(&graph, &[]);
        assert_eq!(rules_hit(&diags), vec!["resource_produced_upstream"]);
        assert!(diags[0].message.contains("no task writes"));
    }

    #[test]
    fn two_writers_of_one_key() {
        let graph = TaskGraph::builder("bad")
            .task("a", io(&[], &["k"]))
            .task("b", io(&[], &["k"]))
            .chain(&["a", "b"])
            .build()
            .unwrap();
        let diags = validate(&graph, &[]);
        assert_eq!(rules_hit(&diags), vec!["single_writer"]);
        assert!(diags[0].message.contains("a, b"));
    }

    #[test]
    fn isolated_task_is_a_warning() {
        let graph = TaskGraph::builder("warn")
            .task("a", io(&[], &["x"]))
            .task("b", io(&["x"], &[]))
            .task("lonely", io(&[], &[]))
            .chain(&["a", "b"])
            .build()
            .unwrap();
        let diags = validate_or_raise(&graph).unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].task_id.as_deref(), Some("lonely"));
    }

    #[test]
    fn extra_rules_are_applied() {
        struct NoLoads;
        impl LintRule for NoLoads {
            fn name(&self) -> &str {
                "no_loads"
            }
            fn apply(&self, graph: &TaskGraph) -> Vec<Diagnostic> {
                graph
                    .nodes()
                    .filter(|n| n.id.starts_with("load"))
                    .map(|n| Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: "load task".into(),
                        task_id: Some(n.id.clone()),
                        fix: None,
                    })
                    .collect()
            }
        }
        let graph = TaskGraph::builder("x")
            .task("load_offense", io(&[], &[]))
            .build()
            .unwrap();
        let extra: Vec<Box<dyn LintRule>> = vec![Box::new(NoLoads)];
        assert_eq!(rules_hit(&validate(&graph, &extra)), vec!["no_loads"]);
    }
}
