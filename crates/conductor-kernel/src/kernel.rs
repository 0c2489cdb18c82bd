use crate::config::KernelConfig;
use crate::critic::Critic;
use crate::graph::SubtaskGraph;
use crate::planner::Planner;
use crate::router::Router;
use crate::supervisor::ExecutionSupervisor;
use crate::types::{SubtaskNode, SubtaskStatus, Task, TaskError, TaskPhase, TaskResponse};
use conductor_agent::AgentRegistry;
use conductor_core::{Capability, ConductorError, ConductorResult};
use conductor_session::{ContextStore, ExecutionContext};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A subtask status transition or task phase change, published on the
/// kernel's event stream for progress reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task entered a new phase.
    Phase {
        /// Task id.
        task_id: Uuid,
        /// New phase.
        phase: TaskPhase,
    },
    /// A subtask changed status.
    Subtask {
        /// Task id.
        task_id: Uuid,
        /// Subtask id.
        subtask_id: Uuid,
        /// The subtask's capability.
        capability: Capability,
        /// New status.
        status: SubtaskStatus,
    },
}

/// Failure detail carried from a dispatch to the task report.
#[derive(Debug, Clone)]
struct SubtaskFailure {
    kind: String,
    detail: String,
}

impl From<ConductorError> for SubtaskFailure {
    fn from(e: ConductorError) -> Self {
        Self {
            kind: e.kind().to_string(),
            detail: e.to_string(),
        }
    }
}

struct TaskRecord {
    cancel: CancellationToken,
    response: Option<TaskResponse>,
}

/// The top-level orchestrator.
///
/// Runs the per-task state machine Planning → Executing → Synthesizing →
/// Completed | Failed. Subtasks with no dependency relationship dispatch
/// concurrently (bounded by the global ceiling and per-agent limits);
/// their results are applied to the graph one at a time in this loop, so
/// the kernel is the only writer of subtask status.
pub struct Kernel {
    planner: Arc<dyn Planner>,
    registry: Arc<AgentRegistry>,
    router: Router,
    supervisor: Arc<ExecutionSupervisor>,
    critic: Critic,
    store: Arc<dyn ContextStore>,
    config: KernelConfig,
    permits: Arc<Semaphore>,
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    events: broadcast::Sender<TaskEvent>,
}

impl Kernel {
    /// Assemble a kernel from its collaborators.
    pub fn new(
        planner: Arc<dyn Planner>,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn ContextStore>,
        config: KernelConfig,
    ) -> Self {
        let router = Router::new(Arc::clone(&registry));
        let supervisor = Arc::new(ExecutionSupervisor::new(
            Arc::clone(&registry),
            config.supervisor.clone(),
        ));
        let critic = Critic::new(config.critic.clone());
        let (events, _) = broadcast::channel(256);
        Self {
            planner,
            registry,
            router,
            supervisor,
            critic,
            store,
            permits: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            config,
            tasks: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// The agent registry backing this kernel.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Subscribe to task progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Cancel a task. In-flight dispatches receive the signal and release
    /// their agent slots promptly. Returns false for unknown task ids.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let tasks = self.tasks.read().await;
        match tasks.get(&task_id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Accept a new task for a session and run it to a terminal phase.
    pub async fn submit(
        &self,
        session_id: Uuid,
        raw_input: impl Into<String>,
    ) -> ConductorResult<TaskResponse> {
        self.submit_task(Task::new(session_id, raw_input)).await
    }

    /// Run a pre-built task. Replaying an id that already completed
    /// returns the cached response without re-invoking any agent.
    pub async fn submit_task(&self, task: Task) -> ConductorResult<TaskResponse> {
        let cancel = {
            let mut tasks = self.tasks.write().await;
            if let Some(record) = tasks.get(&task.id) {
                if let Some(response) = &record.response {
                    info!(task_id = %task.id, "Replaying cached response");
                    return Ok(response.clone());
                }
                return Err(ConductorError::Kernel(format!(
                    "task {} is already in flight",
                    task.id
                )));
            }
            let cancel = CancellationToken::new();
            tasks.insert(
                task.id,
                TaskRecord {
                    cancel: cancel.clone(),
                    response: None,
                },
            );
            cancel
        };

        let response = self.run(&task, &cancel).await;

        let mut tasks = self.tasks.write().await;
        if response.status == TaskPhase::Completed {
            if let Some(record) = tasks.get_mut(&task.id) {
                record.response = Some(response.clone());
            }
        } else {
            // Failed tasks are not cached, so the caller may retry the id.
            tasks.remove(&task.id);
        }
        Ok(response)
    }

    /// The full pipeline for one task. Infallible: every error becomes a
    /// structured Failed response.
    async fn run(&self, task: &Task, cancel: &CancellationToken) -> TaskResponse {
        let started = Instant::now();
        info!(task_id = %task.id, session_id = %task.session_id, "Kernel: task accepted");
        self.emit_phase(task.id, TaskPhase::Planning);

        let mut context = match self.store.get(task.session_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => ExecutionContext::new(task.session_id),
            Err(e) => {
                warn!(session_id = %task.session_id, error = %e, "Context load failed, starting fresh");
                ExecutionContext::new(task.session_id)
            }
        };

        let mut graph = match self.plan(task, &context).await {
            Ok(graph) => graph,
            Err(e) => {
                return self.fail(task, started, None, None, e.into(), None);
            }
        };

        self.emit_phase(task.id, TaskPhase::Executing);
        let mut failures: HashMap<Uuid, SubtaskFailure> = HashMap::new();
        self.walk(task, cancel, &mut graph, &mut context, &mut failures)
            .await;

        if cancel.is_cancelled() {
            let ids: Vec<Uuid> = graph.all_nodes().iter().map(|n| n.id).collect();
            for id in ids {
                if graph.get(id).is_some_and(|n| !n.status.is_terminal()) {
                    graph.mark_skipped(id);
                    self.emit_subtask(task.id, id, &graph);
                }
            }
            return self.fail(
                task,
                started,
                None,
                None,
                SubtaskFailure {
                    kind: "cancelled".to_string(),
                    detail: "task cancelled by caller".to_string(),
                },
                Some(&graph),
            );
        }

        if graph.has_required_failure() {
            let failed_node = graph.first_required_failure();
            let (subtask_id, capability) = failed_node
                .map(|n| (Some(n.id), Some(n.capability.clone())))
                .unwrap_or((None, None));
            let failure = subtask_id
                .and_then(|id| failures.get(&id).cloned())
                .unwrap_or_else(|| SubtaskFailure {
                    kind: "kernel".to_string(),
                    detail: "a required subtask did not succeed".to_string(),
                });
            return self.fail(task, started, subtask_id, capability, failure, Some(&graph));
        }

        self.emit_phase(task.id, TaskPhase::Synthesizing);
        let final_payload = synthesize(&graph, &context);

        context.record_turn(&task.raw_input, final_payload.clone());
        if let Err(e) = self.store.put(&context).await {
            warn!(session_id = %task.session_id, error = %e, "Context persist failed");
        }

        self.emit_phase(task.id, TaskPhase::Completed);
        info!(
            task_id = %task.id,
            duration_ms = started.elapsed().as_millis() as u64,
            subtasks = graph.len(),
            "Kernel: task completed"
        );

        TaskResponse {
            task_id: task.id,
            session_id: task.session_id,
            status: TaskPhase::Completed,
            final_payload: Some(final_payload),
            error: None,
            total_subtasks: graph.len(),
            succeeded_subtasks: graph.count_where(|s| matches!(s, SubtaskStatus::Succeeded)),
            failed_subtasks: graph.count_where(|s| matches!(s, SubtaskStatus::Failed { .. })),
            skipped_subtasks: graph.count_where(|s| matches!(s, SubtaskStatus::Skipped)),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn plan(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> ConductorResult<SubtaskGraph> {
        let nodes = self.planner.decompose(task, context).await?;
        let graph = SubtaskGraph::new(nodes);
        graph.validate()?;
        info!(task_id = %task.id, subtasks = graph.len(), "Kernel: plan complete");
        Ok(graph)
    }

    /// Graph walk: dispatch every ready node, apply completions one at a
    /// time, advance dependents, until no node remains pending, ready, or
    /// running.
    async fn walk(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        graph: &mut SubtaskGraph,
        context: &mut ExecutionContext,
        failures: &mut HashMap<Uuid, SubtaskFailure>,
    ) {
        let mut in_flight: JoinSet<(Uuid, Result<serde_json::Value, SubtaskFailure>)> =
            JoinSet::new();

        self.dispatch_ready(task, cancel, graph, &mut in_flight);

        while let Some(joined) = in_flight.join_next().await {
            let (subtask_id, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Dispatch task aborted");
                    continue;
                }
            };

            match outcome {
                Ok(payload) => {
                    graph.mark_succeeded(subtask_id);
                    self.emit_subtask(task.id, subtask_id, graph);
                    context.record_result(subtask_id, payload);
                    if let Err(e) = self.store.put(context).await {
                        warn!(session_id = %task.session_id, error = %e, "Context persist failed");
                    }
                }
                Err(failure) => {
                    graph.mark_failed(subtask_id, format!("{}: {}", failure.kind, failure.detail));
                    self.emit_subtask(task.id, subtask_id, graph);
                    failures.insert(subtask_id, failure);
                    for skipped in graph.cascade_skips() {
                        self.emit_subtask(task.id, skipped, graph);
                    }
                }
            }

            if !cancel.is_cancelled() {
                self.dispatch_ready(task, cancel, graph, &mut in_flight);
            }
        }

        // An acyclic, validated graph always drains; anything left pending
        // here means an unsatisfiable dependency slipped through.
        if !cancel.is_cancelled() && !graph.is_complete() {
            warn!(task_id = %task.id, "Graph walk left unresolved nodes; skipping them");
            let ids: Vec<Uuid> = graph.all_nodes().iter().map(|n| n.id).collect();
            for id in ids {
                if graph.get(id).is_some_and(|n| !n.status.is_terminal()) {
                    graph.mark_skipped(id);
                    self.emit_subtask(task.id, id, graph);
                }
            }
        }
    }

    fn dispatch_ready(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        graph: &mut SubtaskGraph,
        in_flight: &mut JoinSet<(Uuid, Result<serde_json::Value, SubtaskFailure>)>,
    ) {
        for id in graph.refresh_ready() {
            graph.mark_running(id);
            self.emit_subtask(task.id, id, graph);

            let Some(node) = graph.get(id).cloned() else {
                continue;
            };
            let permits = Arc::clone(&self.permits);
            let router = self.router.clone();
            let supervisor = Arc::clone(&self.supervisor);
            let critic = self.critic.clone();
            let cancel = cancel.clone();
            let backoff = Duration::from_millis(self.config.router_retry_backoff_ms);

            in_flight.spawn(async move {
                let result =
                    dispatch_subtask(node, permits, router, supervisor, critic, cancel, backoff)
                        .await;
                (id, result)
            });
        }
    }

    fn fail(
        &self,
        task: &Task,
        started: Instant,
        subtask_id: Option<Uuid>,
        capability: Option<Capability>,
        failure: SubtaskFailure,
        graph: Option<&SubtaskGraph>,
    ) -> TaskResponse {
        error!(
            task_id = %task.id,
            kind = %failure.kind,
            detail = %failure.detail,
            "Kernel: task failed"
        );
        self.emit_phase(task.id, TaskPhase::Failed);
        TaskResponse {
            task_id: task.id,
            session_id: task.session_id,
            status: TaskPhase::Failed,
            final_payload: None,
            error: Some(TaskError {
                subtask_id,
                capability,
                kind: failure.kind,
                detail: failure.detail,
            }),
            total_subtasks: graph.map_or(0, SubtaskGraph::len),
            succeeded_subtasks: graph
                .map_or(0, |g| g.count_where(|s| matches!(s, SubtaskStatus::Succeeded))),
            failed_subtasks: graph
                .map_or(0, |g| g.count_where(|s| matches!(s, SubtaskStatus::Failed { .. }))),
            skipped_subtasks: graph
                .map_or(0, |g| g.count_where(|s| matches!(s, SubtaskStatus::Skipped))),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn emit_phase(&self, task_id: Uuid, phase: TaskPhase) {
        let _ = self.events.send(TaskEvent::Phase { task_id, phase });
    }

    fn emit_subtask(&self, task_id: Uuid, subtask_id: Uuid, graph: &SubtaskGraph) {
        if let Some(node) = graph.get(subtask_id) {
            let _ = self.events.send(TaskEvent::Subtask {
                task_id,
                subtask_id,
                capability: node.capability.clone(),
                status: node.status.clone(),
            });
        }
    }
}

/// One subtask dispatch: route (with a single retry after a short backoff
/// on `NoEligibleAgent`), execute all attempts, let the critic select.
async fn dispatch_subtask(
    node: SubtaskNode,
    permits: Arc<Semaphore>,
    router: Router,
    supervisor: Arc<ExecutionSupervisor>,
    critic: Critic,
    cancel: CancellationToken,
    backoff: Duration,
) -> Result<serde_json::Value, SubtaskFailure> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| SubtaskFailure::from(ConductorError::Kernel("kernel shut down".into())))?;
    if cancel.is_cancelled() {
        return Err(ConductorError::Cancelled.into());
    }

    let select = || async {
        router
            .select_agents(&node.capability, node.ensemble_size, node.optional_ensemble)
            .await
    };
    let agents = match select().await {
        Ok(agents) => agents,
        Err(ConductorError::NoEligibleAgent { .. }) => {
            tokio::time::sleep(backoff).await;
            select().await.map_err(SubtaskFailure::from)?
        }
        Err(e) => return Err(e.into()),
    };

    let candidates = supervisor.execute(&node, &agents, &cancel).await;
    if cancel.is_cancelled() {
        return Err(ConductorError::Cancelled.into());
    }

    match critic.select(node.id, candidates.clone()) {
        Ok(selected) => Ok(selected.payload),
        Err(no_viable) => {
            // A lone failed attempt surfaces its own kind (e.g. a plain
            // timeout) instead of the ensemble-level wrapper.
            let mut errored = candidates.iter().filter(|c| c.error.is_some());
            match (errored.next(), errored.next()) {
                (Some(only), None) => Err(SubtaskFailure {
                    kind: only
                        .error_kind
                        .clone()
                        .unwrap_or_else(|| "agent_invocation".to_string()),
                    detail: only.error.clone().unwrap_or_default(),
                }),
                _ => Err(no_viable.into()),
            }
        }
    }
}

/// Assemble terminal node outputs into the response payload, in creation
/// order so the same graph always synthesizes the same response.
fn synthesize(graph: &SubtaskGraph, context: &ExecutionContext) -> serde_json::Value {
    let payloads: Vec<serde_json::Value> = graph
        .terminal_nodes()
        .iter()
        .filter(|n| matches!(n.status, SubtaskStatus::Succeeded))
        .filter_map(|n| context.accumulated_results.get(&n.id).cloned())
        .collect();

    match payloads.len() {
        0 => serde_json::Value::Null,
        1 => payloads.into_iter().next().unwrap_or(serde_json::Value::Null),
        _ => {
            if payloads.iter().all(serde_json::Value::is_string) {
                let joined = payloads
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                serde_json::Value::String(joined)
            } else {
                serde_json::Value::Array(payloads)
            }
        }
    }
}
