//! Core types and error definitions for the Conductor orchestration kernel.
//!
//! This crate provides the foundational types shared across all Conductor
//! crates: the unified error enum, the capability identifier used for task
//! routing, and common result aliases.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Capability`] — A named skill category used to route subtasks to agents.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Conductor kernel.
///
/// Attempt-level variants (`AgentInvocation`, `AgentTimeout`) are normally
/// absorbed by the execution supervisor's retry logic; subtask- and
/// task-level variants propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// The planner could not reduce a task to at least one actionable subtask.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// No capable, healthy agent was available for a required capability.
    #[error("No eligible agent for capability '{capability}': {detail}")]
    NoEligibleAgent {
        /// The capability that could not be routed.
        capability: String,
        /// Why routing failed (all busy, all circuit-open, none registered).
        detail: String,
    },

    /// A worker reported an error for a single invocation attempt.
    #[error("Agent invocation error from '{agent_id}': {detail}")]
    AgentInvocation {
        /// The agent that produced the error.
        agent_id: String,
        /// Worker-reported error detail.
        detail: String,
    },

    /// A single invocation attempt exceeded its deadline.
    #[error("Agent '{agent_id}' timed out after {timeout_ms}ms")]
    AgentTimeout {
        /// The agent that timed out.
        agent_id: String,
        /// The deadline that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The critic received no usable candidate results for a subtask.
    #[error("No viable result for subtask {subtask_id}: {detail}")]
    NoViableResult {
        /// The subtask whose candidates were all unusable.
        subtask_id: Uuid,
        /// Summary of why every candidate was rejected.
        detail: String,
    },

    /// An agent is excluded from routing while its circuit breaker is open.
    #[error("Agent '{0}' circuit is open")]
    CircuitOpen(String),

    /// The task was cancelled before completion.
    #[error("Task cancelled")]
    Cancelled,

    /// An error from the agent registry (e.g. duplicate registration).
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error from the context store adapter.
    #[error("Context error: {0}")]
    Context(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the kernel's task state machine or graph walk.
    #[error("Kernel error: {0}")]
    Kernel(String),

    /// An error from the API gateway layer.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Short machine-readable kind tag, used in task failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Decomposition(_) => "decomposition",
            ConductorError::NoEligibleAgent { .. } => "no_eligible_agent",
            ConductorError::AgentInvocation { .. } => "agent_invocation",
            ConductorError::AgentTimeout { .. } => "agent_timeout",
            ConductorError::NoViableResult { .. } => "no_viable_result",
            ConductorError::CircuitOpen(_) => "circuit_open",
            ConductorError::Cancelled => "cancelled",
            ConductorError::Registry(_) => "registry",
            ConductorError::Context(_) => "context",
            ConductorError::Config(_) => "config",
            ConductorError::Kernel(_) => "kernel",
            ConductorError::Gateway(_) => "gateway",
            ConductorError::Json(_) => "json",
            ConductorError::Io(_) => "io",
        }
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

// --- Capability ---

/// A named skill category used to route subtasks to agents.
///
/// Capabilities are plain lowercase strings (`"research"`,
/// `"code-generation"`, `"chat"`); new ones appear at runtime when agents
/// registering them are added, so this is a newtype over `String` rather
/// than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Creates a capability from any string-like value, lowercased.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    /// The capability name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
