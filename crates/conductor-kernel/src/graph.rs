use crate::types::{SubtaskNode, SubtaskStatus};
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;
use uuid::Uuid;

/// The acyclic dependency structure produced by decomposing one task.
///
/// Status transitions happen only through the `mark_*` methods; the kernel
/// is the sole caller, which keeps router/supervisor/critic free of races
/// on node state.
pub struct SubtaskGraph {
    nodes: HashMap<Uuid, SubtaskNode>,
}

impl SubtaskGraph {
    /// Build a graph from planner output.
    pub fn new(nodes: Vec<SubtaskNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
        }
    }

    /// Check the planner invariants: at least one node, every dependency
    /// resolving inside this graph, and no cycles.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.nodes.is_empty() {
            return Err(ConductorError::Decomposition(
                "planner produced no subtasks".to_string(),
            ));
        }
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(ConductorError::Decomposition(format!(
                        "subtask {} depends on {} which is not in the graph",
                        node.id, dep
                    )));
                }
            }
        }
        if self.has_cycle() {
            return Err(ConductorError::Decomposition(
                "dependency cycle detected in subtask graph".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a node by id.
    pub fn get(&self, id: Uuid) -> Option<&SubtaskNode> {
        self.nodes.get(&id)
    }

    /// All nodes in creation order.
    pub fn all_nodes(&self) -> Vec<&SubtaskNode> {
        let mut nodes: Vec<&SubtaskNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| (n.created_at, n.id));
        nodes
    }

    /// Promote Pending nodes whose dependencies are all resolved
    /// (Succeeded, or optional and Failed/Skipped) to Ready.
    /// Returns the newly ready ids in creation order.
    pub fn refresh_ready(&mut self) -> Vec<Uuid> {
        let mut newly_ready: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = Vec::new();
        let ids: Vec<Uuid> = self.nodes.keys().copied().collect();
        for id in ids {
            let satisfied = {
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                if node.status != SubtaskStatus::Pending {
                    continue;
                }
                node.dependencies.iter().all(|dep| {
                    self.nodes.get(dep).is_some_and(|d| match &d.status {
                        SubtaskStatus::Succeeded => true,
                        SubtaskStatus::Failed { .. } | SubtaskStatus::Skipped => d.optional,
                        _ => false,
                    })
                })
            };
            if satisfied {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.status = SubtaskStatus::Ready;
                    newly_ready.push((node.created_at, id));
                }
            }
        }
        newly_ready.sort();
        newly_ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Skip every node transitively blocked by a required dependency that
    /// ended Failed or Skipped. Runs to a fixpoint so chains collapse in
    /// one call. Returns the ids that were skipped.
    pub fn cascade_skips(&mut self) -> Vec<Uuid> {
        let mut skipped = Vec::new();
        loop {
            let mut to_skip: Vec<Uuid> = Vec::new();
            for node in self.nodes.values() {
                if !matches!(node.status, SubtaskStatus::Pending | SubtaskStatus::Ready) {
                    continue;
                }
                let blocked = node.dependencies.iter().any(|dep| {
                    self.nodes.get(dep).is_some_and(|d| {
                        !d.optional
                            && matches!(
                                d.status,
                                SubtaskStatus::Failed { .. } | SubtaskStatus::Skipped
                            )
                    })
                });
                if blocked {
                    to_skip.push(node.id);
                }
            }
            if to_skip.is_empty() {
                break;
            }
            for id in to_skip {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.status = SubtaskStatus::Skipped;
                    skipped.push(id);
                }
            }
        }
        skipped
    }

    /// Mark a node as dispatched.
    pub fn mark_running(&mut self, id: Uuid) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = SubtaskStatus::Running;
        }
    }

    /// Mark a node as succeeded.
    pub fn mark_succeeded(&mut self, id: Uuid) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = SubtaskStatus::Succeeded;
        }
    }

    /// Mark a node as failed with a reason.
    pub fn mark_failed(&mut self, id: Uuid, reason: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = SubtaskStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// Mark a node as skipped.
    pub fn mark_skipped(&mut self, id: Uuid) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = SubtaskStatus::Skipped;
        }
    }

    /// Whether every node reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    /// Whether any non-optional node ended Failed or Skipped.
    pub fn has_required_failure(&self) -> bool {
        self.nodes.values().any(|n| {
            !n.optional
                && matches!(
                    n.status,
                    SubtaskStatus::Failed { .. } | SubtaskStatus::Skipped
                )
        })
    }

    /// The first non-optional failed node in creation order, for reporting.
    pub fn first_required_failure(&self) -> Option<&SubtaskNode> {
        self.all_nodes()
            .into_iter()
            .find(|n| !n.optional && matches!(n.status, SubtaskStatus::Failed { .. }))
    }

    /// Terminal nodes (no dependents) in creation order; their outputs form
    /// the synthesized response.
    pub fn terminal_nodes(&self) -> Vec<&SubtaskNode> {
        self.all_nodes()
            .into_iter()
            .filter(|n| {
                !self
                    .nodes
                    .values()
                    .any(|other| other.dependencies.contains(&n.id))
            })
            .collect()
    }

    /// Count nodes in the given terminal bucket.
    pub fn count_where(&self, f: impl Fn(&SubtaskStatus) -> bool) -> usize {
        self.nodes.values().filter(|n| f(&n.status)).count()
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        for &id in self.nodes.keys() {
            if self.dfs_cycle(id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(&self, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(node) = self.nodes.get(&id) {
            for dep in &node.dependencies {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}
