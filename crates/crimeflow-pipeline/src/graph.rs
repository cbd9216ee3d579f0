//! The fixed task graph: a node set plus a deduplicated edge set, checked for acyclicity when it
//! is built.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crimeflow_types::{PipelineError, Result};

use crate::task::Task;

#[derive(Clone)]
pub struct TaskNode {
    pub id: String,
    pub task: Arc<dyn Task>,
    /// Overrides the pipeline-wide retry count for this task.
    pub retries: Option<usize>,
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("kind", &self.task.kind())
            .field("retries", &self.retries)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub name: String,
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    /// Topological order, ties broken by declaration order.
    order: Vec<usize>,
}

impl TaskGraph {
    pub fn builder(name: impl Into<String>) -> TaskGraphBuilder {
        TaskGraphBuilder::new(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.predecessors)
    }

    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, &self.successors)
    }

    /// Task ids in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].id.as_str()).collect()
    }

    /// Every task from which `id` is reachable.
    pub fn ancestors(&self, id: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };
        let mut stack: Vec<usize> = self.predecessors[start].clone();
        while let Some(i) = stack.pop() {
            if seen.insert(self.nodes[i].id.as_str()) {
                stack.extend(self.predecessors[i].iter().copied());
            }
        }
        seen
    }

    fn neighbours<'a>(&'a self, id: &str, table: &'a [Vec<usize>]) -> Vec<&'a str> {
        self.index
            .get(id)
            .map(|&i| table[i].iter().map(|&j| self.nodes[j].id.as_str()).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct TaskGraphBuilder {
    name: String,
    nodes: Vec<TaskNode>,
    edges: Vec<(String, String)>,
}

impl TaskGraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn task(self, id: impl Into<String>, task: impl Task + 'static) -> Self {
        self.node(id, Arc::new(task), None)
    }

    pub fn task_with_retries(
        self,
        id: impl Into<String>,
        task: impl Task + 'static,
        retries: usize,
    ) -> Self {
        self.node(id, Arc::new(task), Some(retries))
    }

    pub fn node(mut self, id: impl Into<String>, task: Arc<dyn Task>, retries: Option<usize>) -> Self {
        self.nodes.push(TaskNode {
            id: id.into(),
            task,
            retries,
        });
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Add edges `ids[0] -> ids[1] -> ...`.
    pub fn chain(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self.edges.push((pair[0].to_string(), pair[1].to_string()));
        }
        self
    }

    pub fn build(self) -> Result<TaskGraph> {
        let mut index = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(PipelineError::ValidationError(format!(
                    "duplicate task id '{}'",
                    node.id
                )));
            }
        }

        let n = self.nodes.len();
        let mut predecessors = vec![Vec::new(); n];
        let mut successors = vec![Vec::new(); n];
        let mut edges = Vec::new();
        let mut seen = HashSet::new();
        for (from, to) in self.edges {
            let (&f, &t) = match (index.get(&from), index.get(&to)) {
                (Some(f), Some(t)) => (f, t),
                (None, _) => {
                    return Err(PipelineError::ValidationError(format!(
                        "edge {from} -> {to} references unknown task '{from}'"
                    )))
                }
                (_, None) => {
                    return Err(PipelineError::ValidationError(format!(
                        "edge {from} -> {to} references unknown task '{to}'"
                    )))
                }
            };
            if f == t {
                return Err(PipelineError::ValidationError(format!(
                    "task '{from}' depends on itself"
                )));
            }
            if seen.insert((f, t)) {
                successors[f].push(t);
                predecessors[t].push(f);
                edges.push((from, to));
            }
        }

        let order = topological_order(&predecessors, &successors).map_err(|stuck| {
            let ids: Vec<&str> = stuck.iter().map(|&i| self.nodes[i].id.as_str()).collect();
            PipelineError::ValidationError(format!(
                "task graph has a cycle through: {}",
                ids.join(", ")
            ))
        })?;

        tracing::debug!(
            pipeline = %self.name,
            tasks = n,
            edges = edges.len(),
            "Task graph built"
        );
        Ok(TaskGraph {
            name: self.name,
            nodes: self.nodes,
            index,
            edges,
            predecessors,
            successors,
            order,
        })
    }
}

/// Kahn's algorithm with a min-heap on declaration index. On a cycle, returns the indices that
/// could not be ordered.
fn topological_order(
    predecessors: &[Vec<usize>],
    successors: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &s in &successors[i] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.push(Reverse(s));
            }
        }
    }
    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        Err((0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}
