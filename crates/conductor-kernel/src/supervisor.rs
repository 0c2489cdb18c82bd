use crate::router::{RoutedAgent, Router};
use crate::types::{CandidateResult, SubtaskNode};
use conductor_agent::AgentRegistry;
use conductor_core::{Capability, ConductorError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Timeout and wait-ceiling settings for supervised execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Per-attempt deadline when no capability override applies.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Per-capability deadline overrides, keyed by capability name.
    #[serde(default)]
    pub capability_timeouts: HashMap<String, u64>,
    /// Ceiling on how long an ensemble is awaited before whatever
    /// candidates exist are forwarded to the critic.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_wait_ms() -> u64 {
    30_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            capability_timeouts: HashMap::new(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Runs subtask attempts against routed agents concurrently, enforcing
/// deadlines, feeding the circuit breaker, and retrying a failed attempt
/// once against a different eligible agent.
///
/// The supervisor never writes subtask status; it only produces
/// [`CandidateResult`]s for the kernel and critic. Partial ensembles are
/// valid output, never an error by themselves.
pub struct ExecutionSupervisor {
    registry: Arc<AgentRegistry>,
    router: Router,
    config: SupervisorConfig,
}

impl ExecutionSupervisor {
    /// Create a supervisor over the given registry.
    pub fn new(registry: Arc<AgentRegistry>, config: SupervisorConfig) -> Self {
        let router = Router::new(Arc::clone(&registry));
        Self {
            registry,
            router,
            config,
        }
    }

    fn timeout_for(&self, capability: &Capability) -> Duration {
        let ms = self
            .config
            .capability_timeouts
            .get(capability.as_str())
            .copied()
            .unwrap_or(self.config.default_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Execute all attempts for a subtask and collect their results.
    ///
    /// Attempts run concurrently; collection stops when every attempt chain
    /// finished or the wait ceiling expires, whichever comes first. On
    /// cancellation (external or ceiling) in-flight attempts stop awaiting
    /// and release their concurrency slots promptly.
    pub async fn execute(
        &self,
        subtask: &SubtaskNode,
        agents: &[RoutedAgent],
        cancel: &CancellationToken,
    ) -> Vec<CandidateResult> {
        let timeout = self.timeout_for(&subtask.capability);
        let attempt_cancel = cancel.child_token();
        let used: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(
            agents.iter().map(|a| a.agent_id.clone()).collect(),
        ));

        let mut join_set: JoinSet<CandidateResult> = JoinSet::new();
        for agent in agents {
            let registry = Arc::clone(&self.registry);
            let router = self.router.clone();
            let used = Arc::clone(&used);
            let cancel = attempt_cancel.clone();
            let agent = agent.clone();
            let subtask_id = subtask.id;
            let capability = subtask.capability.clone();
            let payload = subtask.input_payload.clone();

            join_set.spawn(async move {
                attempt_chain(
                    registry, router, used, cancel, subtask_id, capability, payload, agent, timeout,
                )
                .await
            });
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.max_wait_ms);
        let mut ceiling_hit = false;
        let mut results = Vec::new();

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(candidate)) => results.push(candidate),
                    Some(Err(e)) => warn!(subtask_id = %subtask.id, error = %e, "Attempt task failed"),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline), if !ceiling_hit => {
                    ceiling_hit = true;
                    debug!(subtask_id = %subtask.id, "Ensemble wait ceiling reached");
                    attempt_cancel.cancel();
                }
            }
        }

        results
    }
}

/// One attempt plus at most one retry against a different eligible agent.
#[allow(clippy::too_many_arguments)]
async fn attempt_chain(
    registry: Arc<AgentRegistry>,
    router: Router,
    used: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
    subtask_id: Uuid,
    capability: Capability,
    payload: serde_json::Value,
    agent: RoutedAgent,
    timeout: Duration,
) -> CandidateResult {
    let first = attempt(
        &registry, &cancel, subtask_id, &capability, &payload, &agent, timeout,
    )
    .await;

    if first.error.is_none() || cancel.is_cancelled() {
        return first;
    }

    // Retry once, never against the agent that just failed.
    let fallback = {
        let mut used = used.lock().await;
        let exclude: Vec<String> = used.iter().cloned().collect();
        match router.fallback_agent(&capability, &exclude).await {
            Some(found) => {
                used.insert(found.agent_id.clone());
                Some(RoutedAgent {
                    agent_id: found.agent_id,
                    rank: agent.rank,
                })
            }
            None => None,
        }
    };

    match fallback {
        Some(retry_agent) => {
            debug!(
                subtask_id = %subtask_id,
                failed_agent = %agent.agent_id,
                retry_agent = %retry_agent.agent_id,
                "Retrying attempt on a different agent"
            );
            attempt(
                &registry,
                &cancel,
                subtask_id,
                &capability,
                &payload,
                &retry_agent,
                timeout,
            )
            .await
        }
        None => first,
    }
}

/// A single supervised invocation of one agent.
async fn attempt(
    registry: &AgentRegistry,
    cancel: &CancellationToken,
    subtask_id: Uuid,
    capability: &Capability,
    payload: &serde_json::Value,
    agent: &RoutedAgent,
    timeout: Duration,
) -> CandidateResult {
    let started = std::time::Instant::now();
    let errored = |error: ConductorError, latency: Duration| CandidateResult {
        subtask_id,
        agent_id: agent.agent_id.clone(),
        payload: serde_json::Value::Null,
        latency_ms: latency.as_millis() as u64,
        error: Some(error.to_string()),
        error_kind: Some(error.kind().to_string()),
        score: None,
        router_rank: agent.rank,
    };

    if !registry.try_acquire_slot(&agent.agent_id).await {
        return errored(
            ConductorError::AgentInvocation {
                agent_id: agent.agent_id.clone(),
                detail: "no free concurrency slot".to_string(),
            },
            started.elapsed(),
        );
    }

    let Some(handler) = registry.handler(&agent.agent_id).await else {
        registry.release_slot(&agent.agent_id).await;
        return errored(
            ConductorError::AgentInvocation {
                agent_id: agent.agent_id.clone(),
                detail: "agent disappeared from registry".to_string(),
            },
            started.elapsed(),
        );
    };

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(ConductorError::Cancelled),
        invoked = tokio::time::timeout(timeout, handler.invoke(capability, payload, timeout)) => {
            match invoked {
                Ok(result) => result,
                Err(_elapsed) => Err(ConductorError::AgentTimeout {
                    agent_id: agent.agent_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    };

    registry.release_slot(&agent.agent_id).await;
    let latency = started.elapsed();

    match outcome {
        Ok(result_payload) => {
            registry.record_success(&agent.agent_id).await;
            CandidateResult {
                subtask_id,
                agent_id: agent.agent_id.clone(),
                payload: result_payload,
                latency_ms: latency.as_millis() as u64,
                error: None,
                error_kind: None,
                score: None,
                router_rank: agent.rank,
            }
        }
        Err(error) => {
            // Cancellation is not the agent's fault; keep it out of the breaker.
            if !matches!(error, ConductorError::Cancelled) {
                registry.record_failure(&agent.agent_id).await;
            }
            errored(error, latency)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_agent::{AgentDescriptor, AgentHandler, BreakerConfig, HealthState};
    use conductor_core::ConductorResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoAgent {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl AgentHandler for EchoAgent {
        async fn invoke(
            &self,
            _capability: &Capability,
            input: &serde_json::Value,
            _deadline: Duration,
        ) -> ConductorResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.clone())
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentHandler for FailingAgent {
        async fn invoke(
            &self,
            _capability: &Capability,
            _input: &serde_json::Value,
            _deadline: Duration,
        ) -> ConductorResult<serde_json::Value> {
            Err(ConductorError::AgentInvocation {
                agent_id: "failing".to_string(),
                detail: "worker exploded".to_string(),
            })
        }
    }

    struct SlowAgent {
        delay: Duration,
    }

    #[async_trait]
    impl AgentHandler for SlowAgent {
        async fn invoke(
            &self,
            _capability: &Capability,
            _input: &serde_json::Value,
            _deadline: Duration,
        ) -> ConductorResult<serde_json::Value> {
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::json!("slow but done"))
        }
    }

    fn registry() -> Arc<AgentRegistry> {
        Arc::new(AgentRegistry::new(BreakerConfig {
            failure_threshold: 10,
            window_secs: 60,
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 60_000,
        }))
    }

    async fn register(
        registry: &AgentRegistry,
        id: &str,
        handler: Arc<dyn AgentHandler>,
    ) {
        registry
            .register(
                AgentDescriptor::new(id, vec![Capability::new("research")]),
                handler,
            )
            .await
            .unwrap();
    }

    fn research_subtask() -> SubtaskNode {
        SubtaskNode::new(
            Uuid::new_v4(),
            Capability::new("research"),
            serde_json::json!("the payload"),
        )
    }

    fn routed(ids: &[&str]) -> Vec<RoutedAgent> {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| RoutedAgent {
                agent_id: (*id).to_string(),
                rank: rank as u32,
            })
            .collect()
    }

    fn config(timeout_ms: u64, max_wait_ms: u64) -> SupervisorConfig {
        SupervisorConfig {
            default_timeout_ms: timeout_ms,
            capability_timeouts: HashMap::new(),
            max_wait_ms,
        }
    }

    #[tokio::test]
    async fn test_single_agent_success() {
        let registry = registry();
        let calls = Arc::new(AtomicU32::new(0));
        register(&registry, "r1", Arc::new(EchoAgent { calls: Arc::clone(&calls) })).await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(1_000, 5_000));
        let results = supervisor
            .execute(&research_subtask(), &routed(&["r1"]), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].payload, serde_json::json!("the payload"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_retries_on_different_agent() {
        let registry = registry();
        let calls = Arc::new(AtomicU32::new(0));
        register(&registry, "bad", Arc::new(FailingAgent)).await;
        register(&registry, "good", Arc::new(EchoAgent { calls: Arc::clone(&calls) })).await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(1_000, 5_000));
        let results = supervisor
            .execute(&research_subtask(), &routed(&["bad"]), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].agent_id, "good");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_alternative_agent_forwards_failure() {
        let registry = registry();
        register(&registry, "bad", Arc::new(FailingAgent)).await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(1_000, 5_000));
        let results = supervisor
            .execute(&research_subtask(), &routed(&["bad"]), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_ref().unwrap().contains("worker exploded"));
        // The failure fed the breaker
        let snap = registry.snapshot().await;
        assert!(snap[0].success_rate < 1.0);
    }

    #[tokio::test]
    async fn test_timeout_converts_to_failed_attempt() {
        let registry = registry();
        register(
            &registry,
            "slow",
            Arc::new(SlowAgent { delay: Duration::from_secs(5) }),
        )
        .await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(30, 5_000));
        let results = supervisor
            .execute(&research_subtask(), &routed(&["slow"]), &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
        // Slot released despite the timeout
        assert_eq!(registry.snapshot().await[0].in_flight, 0);
    }

    #[tokio::test]
    async fn test_ensemble_partial_results_forwarded() {
        let registry = registry();
        let calls = Arc::new(AtomicU32::new(0));
        register(&registry, "ok", Arc::new(EchoAgent { calls })).await;
        register(
            &registry,
            "slow",
            Arc::new(SlowAgent { delay: Duration::from_secs(5) }),
        )
        .await;

        let subtask = research_subtask().with_ensemble(2);
        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(30, 5_000));
        let results = supervisor
            .execute(&subtask, &routed(&["ok", "slow"]), &CancellationToken::new())
            .await;

        // Both attempts report; one succeeded, one timed out.
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|c| c.error.is_none()).count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_releases_slots_promptly() {
        let registry = registry();
        register(
            &registry,
            "slow",
            Arc::new(SlowAgent { delay: Duration::from_secs(30) }),
        )
        .await;

        let cancel = CancellationToken::new();
        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(60_000, 60_000));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let results = supervisor
            .execute(&research_subtask(), &routed(&["slow"]), &cancel)
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_ref().unwrap().contains("cancelled"));
        assert_eq!(registry.snapshot().await[0].in_flight, 0);
        // Cancellation did not count against the agent's health
        assert_eq!(registry.snapshot().await[0].health, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_wait_ceiling_cuts_off_stragglers() {
        let registry = registry();
        register(
            &registry,
            "slow",
            Arc::new(SlowAgent { delay: Duration::from_secs(30) }),
        )
        .await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), config(60_000, 50));
        let started = std::time::Instant::now();
        let results = supervisor
            .execute(&research_subtask(), &routed(&["slow"]), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_some());
        assert_eq!(registry.snapshot().await[0].in_flight, 0);
    }

    #[tokio::test]
    async fn test_capability_timeout_override() {
        let mut cfg = config(60_000, 5_000);
        cfg.capability_timeouts.insert("research".to_string(), 20);

        let registry = registry();
        register(
            &registry,
            "slow",
            Arc::new(SlowAgent { delay: Duration::from_secs(5) }),
        )
        .await;

        let supervisor = ExecutionSupervisor::new(Arc::clone(&registry), cfg);
        let results = supervisor
            .execute(&research_subtask(), &routed(&["slow"]), &CancellationToken::new())
            .await;
        assert!(results[0].error.as_ref().unwrap().contains("timed out"));
    }
}
