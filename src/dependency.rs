//! # Dependency Graph
//!
//! Directed "task A must complete before task B" edges. The graph is kept
//! acyclic at insertion time, and a task with any unfinished prerequisite is
//! never claimable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{NewTask, Task, TaskDependency};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct DependencyGraph {
    store: Arc<dyn TaskStore>,
}

impl DependencyGraph {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Create tasks `t1..tn` where each `t(i)` depends on `t(i-1)`.
    ///
    /// Tasks and edges commit together; any invalid request leaves nothing behind.
    #[instrument(skip(self, specs), fields(chain_length = specs.len()))]
    pub async fn create_chain(&self, specs: Vec<NewTask>) -> Result<Vec<Task>> {
        let tasks = self.store.create_chain(specs).await?;
        debug!(
            head = ?tasks.first().map(|t| t.id),
            tail = ?tasks.last().map(|t| t.id),
            "Task chain created"
        );
        Ok(tasks)
    }

    pub async fn is_satisfied(&self, task_id: Uuid) -> Result<bool> {
        self.store.is_satisfied(task_id).await
    }

    #[instrument(skip(self))]
    pub async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<TaskDependency> {
        self.store.add_dependency(task_id, depends_on).await
    }

    pub async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<TaskDependency>> {
        self.store.dependencies_of(task_id).await
    }
}

/// Whether adding `task_id -> depends_on` would close a cycle.
///
/// True when `task_id` is reachable from `depends_on` by following existing
/// edges, including the trivial self-edge.
pub fn would_create_cycle<'a>(
    edges: impl IntoIterator<Item = &'a TaskDependency>,
    task_id: Uuid,
    depends_on: Uuid,
) -> bool {
    if task_id == depends_on {
        return true;
    }

    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.task_id)
            .or_default()
            .push(edge.depends_on_task_id);
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([depends_on]);
    while let Some(node) = queue.pop_front() {
        if node == task_id {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(&node) {
            queue.extend(next.iter().copied());
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn edge(task_id: Uuid, depends_on: Uuid) -> TaskDependency {
        TaskDependency {
            task_id,
            depends_on_task_id: depends_on,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let a = Uuid::new_v4();
        assert!(would_create_cycle(std::iter::empty(), a, a));
    }

    #[test]
    fn test_transitive_cycle() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        // b waits for a, c waits for b
        let edges = vec![edge(b, a), edge(c, b)];

        assert!(would_create_cycle(&edges, a, c));
        assert!(would_create_cycle(&edges, a, b));
        assert!(!would_create_cycle(&edges, c, a));
        assert!(!would_create_cycle(&edges, Uuid::new_v4(), c));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let (a, b, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let edges = vec![edge(b, a), edge(c, a), edge(d, b)];
        assert!(!would_create_cycle(&edges, d, c));
        assert!(would_create_cycle(&edges, a, d));
    }
}
