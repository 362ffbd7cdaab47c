// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::artifact::{ArtifactRef, ArtifactSpec};
use crate::task::TaskDescriptor;
use crate::types::TaskId;

/// Internal node structure: stores the descriptor plus immediate deps and
/// dependents.
#[derive(Debug, Clone)]
struct TaskNode {
    task: Arc<TaskDescriptor>,
    deps: Vec<TaskId>,
    dependents: Vec<TaskId>,
}

/// Expanded task DAG.
///
/// Produced by [`crate::dag::builder::build`], which already rejected cycles
/// and dangling references, so this type only keeps adjacency information
/// for scheduling, reporting and dry-run output. Task order is the
/// deterministic build order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, TaskNode>,
    artifacts: BTreeMap<ArtifactRef, ArtifactSpec>,
}

impl TaskGraph {
    /// Assemble a graph from tasks (in order) and their dependency lists.
    ///
    /// Dependents are derived from deps; deps naming unknown tasks are kept
    /// on the node but produce no reverse edge.
    pub(crate) fn from_parts(
        tasks: Vec<(Arc<TaskDescriptor>, Vec<TaskId>)>,
        artifacts: BTreeMap<ArtifactRef, ArtifactSpec>,
    ) -> Self {
        let mut order = Vec::with_capacity(tasks.len());
        let mut nodes: HashMap<TaskId, TaskNode> = HashMap::new();

        for (task, deps) in tasks {
            order.push(task.id.clone());
            nodes.insert(
                task.id.clone(),
                TaskNode {
                    task,
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        // Walk in task order so dependents lists are ordered too.
        for id in &order {
            let deps = nodes.get(id).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(id.clone());
                }
            }
        }

        Self {
            order,
            nodes,
            artifacts,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Task ids in build order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.order.iter()
    }

    /// Task descriptors in build order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskDescriptor>> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| &n.task))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TaskDescriptor>> {
        self.nodes.get(id).map(|n| &n.task)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable downstream of `id`, excluding `id`.
    pub fn transitive_dependents(&self, id: &str) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.dependents_of(id).iter().map(|s| s.as_str()).collect();

        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            out.push(next.to_string());
            stack.extend(self.dependents_of(next).iter().map(|s| s.as_str()));
        }
        out
    }

    /// Tasks without dependencies, in build order.
    pub fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| self.dependencies_of(id).is_empty())
            .cloned()
            .collect()
    }

    /// All `(dependency, dependent)` edges, sorted.
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        let mut edges: Vec<(TaskId, TaskId)> = self
            .order
            .iter()
            .flat_map(|id| {
                self.dependencies_of(id)
                    .iter()
                    .map(move |dep| (dep.clone(), id.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn artifact_specs(&self) -> &BTreeMap<ArtifactRef, ArtifactSpec> {
        &self.artifacts
    }

    pub fn artifact(&self, r: &ArtifactRef) -> Option<&ArtifactSpec> {
        self.artifacts.get(r)
    }
}
