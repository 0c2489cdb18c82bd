//! Orchestration kernel: task decomposition, routing, supervised execution,
//! and ensemble evaluation.
//!
//! The kernel accepts a task with a session id, asks the [`Planner`] for an
//! acyclic subtask graph, walks the graph dispatching ready nodes through
//! the [`Router`] and [`ExecutionSupervisor`] concurrently, lets the
//! [`Critic`] pick among competing candidate results, and synthesizes the
//! terminal outputs into a response while updating the session context.
//!
//! # Main types
//!
//! - [`Kernel`] — Top-level orchestrator and per-task state machine.
//! - [`Planner`] / [`HeuristicPlanner`] — Task decomposition.
//! - [`Router`] — Capability-based agent selection.
//! - [`ExecutionSupervisor`] — Timeouts, retries, circuit breaker feedback.
//! - [`Critic`] — Deterministic selection among candidate results.
//! - [`SubtaskGraph`] — Dependency graph with status bookkeeping.

/// Kernel configuration.
pub mod config;
/// Ensemble evaluation and candidate selection.
pub mod critic;
/// Subtask dependency graph.
pub mod graph;
/// Task state machine and graph walk.
pub mod kernel;
/// Task decomposition.
pub mod planner;
/// Capability-based agent selection.
pub mod router;
/// Supervised concurrent execution of subtask attempts.
pub mod supervisor;
/// Shared orchestration types.
pub mod types;

pub use config::KernelConfig;
pub use critic::{Critic, CriticConfig};
pub use graph::SubtaskGraph;
pub use kernel::{Kernel, TaskEvent};
pub use planner::{HeuristicPlanner, Planner};
pub use router::{RoutedAgent, Router};
pub use supervisor::{ExecutionSupervisor, SupervisorConfig};
pub use types::{
    CandidateResult, SubtaskNode, SubtaskStatus, Task, TaskError, TaskPhase, TaskResponse,
};
