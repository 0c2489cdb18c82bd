use conductor_agent::{AgentRegistry, AgentSnapshot, HealthState};
use conductor_core::{Capability, ConductorError, ConductorResult};
use std::sync::Arc;

/// One agent chosen for a subtask, with its position in the ranking.
#[derive(Debug, Clone)]
pub struct RoutedAgent {
    /// The selected agent.
    pub agent_id: String,
    /// Rank in the routing order (0 = first choice).
    pub rank: u32,
}

/// Maps a required capability to an ordered list of eligible agents.
///
/// Selection is a pure function of registry state at call time: agents in
/// `CircuitOpen` are excluded, the rest are ranked by current load
/// ascending, health, then historical success rate descending. No side
/// effects beyond the read.
#[derive(Clone)]
pub struct Router {
    registry: Arc<AgentRegistry>,
}

impl Router {
    /// Create a router over the given registry.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Select up to `ensemble_size` distinct agents for a capability.
    ///
    /// Fails with `NoEligibleAgentError` when no agent qualifies, or when
    /// fewer qualify than a mandatory ensemble requires. Subtasks marked
    /// optional-ensemble degrade to the available subset instead.
    pub async fn select_agents(
        &self,
        capability: &Capability,
        ensemble_size: u32,
        optional_ensemble: bool,
    ) -> ConductorResult<Vec<RoutedAgent>> {
        let snapshots = self.registry.snapshot_for(capability).await;
        if snapshots.is_empty() {
            return Err(ConductorError::NoEligibleAgent {
                capability: capability.to_string(),
                detail: "no agent registered for this capability".to_string(),
            });
        }

        let mut eligible: Vec<AgentSnapshot> = snapshots
            .into_iter()
            .filter(|s| s.health != HealthState::CircuitOpen)
            .collect();

        if eligible.is_empty() {
            return Err(ConductorError::NoEligibleAgent {
                capability: capability.to_string(),
                detail: "all capable agents are circuit-open".to_string(),
            });
        }

        eligible.sort_by(|a, b| {
            a.in_flight
                .cmp(&b.in_flight)
                .then(health_order(a.health).cmp(&health_order(b.health)))
                .then(
                    b.success_rate
                        .partial_cmp(&a.success_rate)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.agent_id.cmp(&b.agent_id))
        });

        if (eligible.len() as u32) < ensemble_size && !optional_ensemble {
            return Err(ConductorError::NoEligibleAgent {
                capability: capability.to_string(),
                detail: format!(
                    "ensemble of {} requested but only {} agent(s) eligible",
                    ensemble_size,
                    eligible.len()
                ),
            });
        }

        Ok(eligible
            .into_iter()
            .take(ensemble_size as usize)
            .enumerate()
            .map(|(rank, s)| RoutedAgent {
                agent_id: s.agent_id,
                rank: rank as u32,
            })
            .collect())
    }

    /// Eligible agents for a capability, excluding the given ids. Used by
    /// the supervisor to pick a retry target different from the agent that
    /// just failed.
    pub async fn fallback_agent(
        &self,
        capability: &Capability,
        exclude: &[String],
    ) -> Option<RoutedAgent> {
        let selected = self
            .select_agents(capability, u32::MAX, true)
            .await
            .ok()?;
        selected
            .into_iter()
            .find(|a| !exclude.contains(&a.agent_id))
    }
}

fn health_order(health: HealthState) -> u8 {
    match health {
        HealthState::Healthy => 0,
        HealthState::Degraded => 1,
        HealthState::CircuitOpen => 2,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_agent::{AgentDescriptor, AgentHandler, BreakerConfig};
    use std::time::Duration;

    struct NoopAgent;

    #[async_trait]
    impl AgentHandler for NoopAgent {
        async fn invoke(
            &self,
            _capability: &Capability,
            _input: &serde_json::Value,
            _deadline: Duration,
        ) -> ConductorResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    async fn registry_with_research_agents(ids: &[&str]) -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new(BreakerConfig {
            failure_threshold: 1,
            window_secs: 60,
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 60_000,
        }));
        for id in ids {
            registry
                .register(
                    AgentDescriptor::new(*id, vec![Capability::new("research")]),
                    Arc::new(NoopAgent),
                )
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_unknown_capability_has_no_eligible_agent() {
        let registry = registry_with_research_agents(&["r1"]).await;
        let router = Router::new(registry);
        let err = router
            .select_agents(&Capability::new("code-generation"), 1, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_eligible_agent");
    }

    #[tokio::test]
    async fn test_circuit_open_agents_excluded() {
        let registry = registry_with_research_agents(&["r1", "r2"]).await;
        // Threshold is 1: a single failure opens r1's circuit.
        registry.record_failure("r1").await;

        let router = Router::new(Arc::clone(&registry));
        let selected = router
            .select_agents(&Capability::new("research"), 1, false)
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].agent_id, "r2");
    }

    #[tokio::test]
    async fn test_all_open_yields_error() {
        let registry = registry_with_research_agents(&["r1", "r2"]).await;
        registry.record_failure("r1").await;
        registry.record_failure("r2").await;

        let router = Router::new(registry);
        let err = router
            .select_agents(&Capability::new("research"), 1, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("circuit-open"));
    }

    #[tokio::test]
    async fn test_load_ranking_prefers_idle_agent() {
        let registry = registry_with_research_agents(&["r1", "r2"]).await;
        assert!(registry.try_acquire_slot("r1").await);

        let router = Router::new(registry);
        let selected = router
            .select_agents(&Capability::new("research"), 2, false)
            .await
            .unwrap();
        assert_eq!(selected[0].agent_id, "r2");
        assert_eq!(selected[1].agent_id, "r1");
        assert_eq!(selected[0].rank, 0);
    }

    #[tokio::test]
    async fn test_mandatory_ensemble_underfilled_fails() {
        let registry = registry_with_research_agents(&["r1"]).await;
        let router = Router::new(registry);
        let err = router
            .select_agents(&Capability::new("research"), 3, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("only 1 agent(s) eligible"));
    }

    #[tokio::test]
    async fn test_optional_ensemble_degrades_to_subset() {
        let registry = registry_with_research_agents(&["r1"]).await;
        let router = Router::new(registry);
        let selected = router
            .select_agents(&Capability::new("research"), 3, true)
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_excludes_failed_agent() {
        let registry = registry_with_research_agents(&["r1", "r2"]).await;
        let router = Router::new(registry);

        let fallback = router
            .fallback_agent(&Capability::new("research"), &["r1".to_string()])
            .await
            .unwrap();
        assert_eq!(fallback.agent_id, "r2");

        let none = router
            .fallback_agent(
                &Capability::new("research"),
                &["r1".to_string(), "r2".to_string()],
            )
            .await;
        assert!(none.is_none());
    }
}
