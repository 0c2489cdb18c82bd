use chrono::{DateTime, Utc};
use conductor_core::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A user task as accepted by the kernel. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier; replaying a completed id returns the cached response.
    pub id: Uuid,
    /// Session this task belongs to.
    pub session_id: Uuid,
    /// The raw user input.
    pub raw_input: String,
    /// When the kernel accepted the task.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(session_id: Uuid, raw_input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            raw_input: raw_input.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of a single subtask node. Written only by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies resolved; eligible for dispatch.
    Ready,
    /// Dispatched to the execution supervisor.
    Running,
    /// A final result was selected.
    Succeeded,
    /// No usable result was produced.
    Failed {
        /// What went wrong, in error-kind/detail form.
        reason: String,
    },
    /// Never dispatched because a required dependency failed.
    Skipped,
}

impl SubtaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubtaskStatus::Succeeded | SubtaskStatus::Failed { .. } | SubtaskStatus::Skipped
        )
    }
}

/// One node of a task's subtask graph, produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskNode {
    /// Node identifier.
    pub id: Uuid,
    /// Owning task.
    pub task_id: Uuid,
    /// Capability required to execute this node.
    pub capability: Capability,
    /// Opaque payload handed to the selected agent(s).
    pub input_payload: serde_json::Value,
    /// Ids of nodes that must resolve before this one becomes ready.
    /// Must all belong to the same task's graph.
    pub dependencies: HashSet<Uuid>,
    /// Current lifecycle state.
    pub status: SubtaskStatus,
    /// Number of agents to run competitively; 1 means no ensemble.
    pub ensemble_size: u32,
    /// An optional node's failure does not fail the task, and dependents
    /// may still become ready once it is Failed or Skipped.
    pub optional: bool,
    /// When true, an under-filled ensemble degrades to the available
    /// subset instead of failing routing.
    pub optional_ensemble: bool,
    /// Creation time, used for deterministic ordering among peers.
    pub created_at: DateTime<Utc>,
}

impl SubtaskNode {
    /// Create a pending node for the given task and capability.
    pub fn new(task_id: Uuid, capability: Capability, input_payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            capability,
            input_payload,
            dependencies: HashSet::new(),
            status: SubtaskStatus::Pending,
            ensemble_size: 1,
            optional: false,
            optional_ensemble: false,
            created_at: Utc::now(),
        }
    }

    /// Add dependency edges.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = Uuid>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Run this node against `n` agents competitively.
    pub fn with_ensemble(mut self, n: u32) -> Self {
        self.ensemble_size = n.max(1);
        self
    }

    /// Mark this node optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Allow the ensemble to degrade to fewer agents than requested.
    pub fn optional_ensemble(mut self) -> Self {
        self.optional_ensemble = true;
        self
    }
}

/// The outcome of one execution attempt, owned by the supervisor until
/// handed to the critic. Immutable once produced except for the score the
/// critic assigns before selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    /// The subtask this attempt served.
    pub subtask_id: Uuid,
    /// The agent that produced it.
    pub agent_id: String,
    /// Result payload; `Null` when the attempt errored.
    pub payload: serde_json::Value,
    /// Observed end-to-end latency of the attempt.
    pub latency_ms: u64,
    /// Worker-reported or supervisor-observed error, if any.
    pub error: Option<String>,
    /// Machine-readable kind tag of `error`, when present.
    pub error_kind: Option<String>,
    /// Rubric score; assigned by the critic before selection, never
    /// compared while absent.
    pub score: Option<f64>,
    /// Position of the agent in the router's ranking (0 = first choice).
    pub router_rank: u32,
}

impl CandidateResult {
    /// Whether this candidate can be selected at all: no error and a
    /// non-empty payload.
    pub fn is_viable(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        match &self.payload {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }
}

/// Per-task state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Decomposing the task into a subtask graph.
    Planning,
    /// Walking the graph and dispatching ready nodes.
    Executing,
    /// Assembling terminal outputs into the response.
    Synthesizing,
    /// Response produced and persisted.
    Completed,
    /// A required subtask failed, planning failed, or the task was cancelled.
    Failed,
}

/// Structured failure detail surfaced to the caller. Never a bare trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    /// The subtask whose failure ended the task, when applicable.
    pub subtask_id: Option<Uuid>,
    /// The capability that could not be served, when applicable.
    pub capability: Option<Capability>,
    /// Machine-readable error kind tag.
    pub kind: String,
    /// Human-readable detail.
    pub detail: String,
}

/// The kernel's answer to a submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// The task this responds to.
    pub task_id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Terminal phase: Completed or Failed.
    pub status: TaskPhase,
    /// Synthesized payload when Completed.
    pub final_payload: Option<serde_json::Value>,
    /// Failure detail when Failed.
    pub error: Option<TaskError>,
    /// Total subtasks in the graph.
    pub total_subtasks: usize,
    /// Subtasks that ended Succeeded.
    pub succeeded_subtasks: usize,
    /// Subtasks that ended Failed.
    pub failed_subtasks: usize,
    /// Subtasks that ended Skipped.
    pub skipped_subtasks: usize,
    /// Wall-clock duration of the whole pipeline.
    pub duration_ms: u64,
}
