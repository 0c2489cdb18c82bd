use crate::descriptor::{AgentDescriptor, AgentSnapshot, HealthState};
use crate::handler::AgentHandler;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{Capability, ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Circuit breaker tuning for the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,
    /// Sliding window length in seconds for counting failures.
    pub window_secs: u64,
    /// Base cooldown in milliseconds for the first open.
    pub cooldown_base_ms: u64,
    /// Maximum cooldown in milliseconds (cap for the doubling).
    pub cooldown_max_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_base_ms: 2_000,
            cooldown_max_ms: 120_000,
        }
    }
}

/// Cooldown for the nth consecutive open: doubles each time, capped.
fn compute_cooldown(config: &BreakerConfig, consecutive_opens: u32) -> u64 {
    let delay = config
        .cooldown_base_ms
        .saturating_mul(2u64.saturating_pow(consecutive_opens));
    delay.min(config.cooldown_max_ms)
}

/// Per-agent mutable runtime state. Only touched under the registry's
/// write lock; the router sees it only through [`AgentSnapshot`]s.
struct AgentEntry {
    descriptor: AgentDescriptor,
    handler: Arc<dyn AgentHandler>,
    health: HealthState,
    in_flight: u32,
    succeeded: u64,
    failed: u64,
    recent_failures: VecDeque<DateTime<Utc>>,
    open_until: Option<DateTime<Utc>>,
    consecutive_opens: u32,
}

impl AgentEntry {
    fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            1.0
        } else {
            self.succeeded as f64 / total as f64
        }
    }

    /// Health with cooldown expiry applied, without mutating stored state.
    /// An expired open reads as Degraded (probation until a success).
    fn effective_health(&self, now: DateTime<Utc>) -> HealthState {
        match (self.health, self.open_until) {
            (HealthState::CircuitOpen, Some(until)) if now >= until => HealthState::Degraded,
            (health, _) => health,
        }
    }
}

/// Owns all registered agents and their runtime state.
///
/// Registration rejects duplicate ids. Health, load, and breaker state are
/// mutated here exclusively (by the execution supervisor); the router only
/// reads snapshots, so routing decisions are a pure function of registry
/// state at call time.
pub struct AgentRegistry {
    config: BreakerConfig,
    agents: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    /// Create an empty registry with the given breaker configuration.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker. Fails with a registry error on duplicate `agent_id`.
    pub async fn register(
        &self,
        descriptor: AgentDescriptor,
        handler: Arc<dyn AgentHandler>,
    ) -> ConductorResult<()> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&descriptor.agent_id) {
            return Err(ConductorError::Registry(format!(
                "agent '{}' is already registered",
                descriptor.agent_id
            )));
        }
        info!(
            agent_id = %descriptor.agent_id,
            capabilities = ?descriptor.capabilities,
            "Registered agent"
        );
        agents.insert(
            descriptor.agent_id.clone(),
            AgentEntry {
                descriptor,
                handler,
                health: HealthState::Healthy,
                in_flight: 0,
                succeeded: 0,
                failed: 0,
                recent_failures: VecDeque::new(),
                open_until: None,
                consecutive_opens: 0,
            },
        );
        Ok(())
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether no agents are registered.
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// The handler for an agent, if registered.
    pub async fn handler(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|e| Arc::clone(&e.handler))
    }

    /// Snapshot of every registered agent.
    pub async fn snapshot(&self) -> Vec<AgentSnapshot> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let mut out: Vec<AgentSnapshot> = agents.values().map(|e| snapshot_entry(e, now)).collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }

    /// Snapshot of agents declaring the given capability.
    pub async fn snapshot_for(&self, capability: &Capability) -> Vec<AgentSnapshot> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let mut out: Vec<AgentSnapshot> = agents
            .values()
            .filter(|e| e.descriptor.serves(capability))
            .map(|e| snapshot_entry(e, now))
            .collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }

    /// Reserve a concurrency slot. Returns false when the agent is unknown
    /// or already at its declared limit.
    pub async fn try_acquire_slot(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(agent_id) {
            Some(entry) if entry.in_flight < entry.descriptor.concurrency_limit => {
                entry.in_flight += 1;
                true
            }
            _ => false,
        }
    }

    /// Release a previously acquired concurrency slot.
    pub async fn release_slot(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// Record a successful attempt: clears the failure window, closes the
    /// breaker, and resets the cooldown doubling.
    pub async fn record_success(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.succeeded += 1;
            entry.recent_failures.clear();
            entry.open_until = None;
            entry.consecutive_opens = 0;
            entry.health = HealthState::Healthy;
        }
    }

    /// Record a failed attempt and update health.
    ///
    /// Crossing half the threshold within the window marks the agent
    /// Degraded; crossing the full threshold opens the circuit for a
    /// cooldown that doubles per consecutive open.
    pub async fn record_failure(&self, agent_id: &str) {
        let now = Utc::now();
        let window = ChronoDuration::seconds(self.config.window_secs as i64);
        let mut agents = self.agents.write().await;
        let Some(entry) = agents.get_mut(agent_id) else {
            return;
        };

        entry.failed += 1;
        entry.recent_failures.push_back(now);
        while let Some(front) = entry.recent_failures.front() {
            if now - *front > window {
                entry.recent_failures.pop_front();
            } else {
                break;
            }
        }

        let windowed = entry.recent_failures.len() as u32;
        if windowed >= self.config.failure_threshold {
            let cooldown_ms = compute_cooldown(&self.config, entry.consecutive_opens);
            entry.consecutive_opens += 1;
            entry.open_until = Some(now + ChronoDuration::milliseconds(cooldown_ms as i64));
            entry.health = HealthState::CircuitOpen;
            entry.recent_failures.clear();
            warn!(
                agent_id,
                cooldown_ms,
                consecutive_opens = entry.consecutive_opens,
                "Circuit opened"
            );
        } else if windowed.saturating_mul(2) >= self.config.failure_threshold {
            if entry.effective_health(now) != HealthState::CircuitOpen {
                entry.health = HealthState::Degraded;
            }
        }
    }
}

fn snapshot_entry(entry: &AgentEntry, now: DateTime<Utc>) -> AgentSnapshot {
    AgentSnapshot {
        agent_id: entry.descriptor.agent_id.clone(),
        capabilities: entry.descriptor.capabilities.clone(),
        concurrency_limit: entry.descriptor.concurrency_limit,
        health: entry.effective_health(now),
        in_flight: entry.in_flight,
        success_rate: entry.success_rate(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
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

    fn research_descriptor(id: &str) -> AgentDescriptor {
        AgentDescriptor::new(id, vec![Capability::new("research")]).with_concurrency_limit(2)
    }

    async fn registry_with(ids: &[&str], config: BreakerConfig) -> AgentRegistry {
        let registry = AgentRegistry::new(config);
        for id in ids {
            registry
                .register(research_descriptor(id), Arc::new(NoopAgent))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = registry_with(&["r1"], BreakerConfig::default()).await;
        let result = registry
            .register(research_descriptor("r1"), Arc::new(NoopAgent))
            .await;
        assert!(result.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_for_filters_capability() {
        let registry = registry_with(&["r1", "r2"], BreakerConfig::default()).await;
        registry
            .register(
                AgentDescriptor::new("c1", vec![Capability::new("chat")]),
                Arc::new(NoopAgent),
            )
            .await
            .unwrap();

        let research = registry.snapshot_for(&Capability::new("research")).await;
        assert_eq!(research.len(), 2);
        let chat = registry.snapshot_for(&Capability::new("chat")).await;
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].agent_id, "c1");
    }

    #[tokio::test]
    async fn test_concurrency_slots() {
        let registry = registry_with(&["r1"], BreakerConfig::default()).await;
        assert!(registry.try_acquire_slot("r1").await);
        assert!(registry.try_acquire_slot("r1").await);
        // Limit is 2
        assert!(!registry.try_acquire_slot("r1").await);

        registry.release_slot("r1").await;
        assert!(registry.try_acquire_slot("r1").await);

        assert!(!registry.try_acquire_slot("missing").await);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let config = BreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 120_000,
        };
        let registry = registry_with(&["r1"], config).await;

        registry.record_failure("r1").await;
        registry.record_failure("r1").await;
        let snap = &registry.snapshot().await[0];
        assert_eq!(snap.health, HealthState::Degraded);

        registry.record_failure("r1").await;
        let snap = &registry.snapshot().await[0];
        assert_eq!(snap.health, HealthState::CircuitOpen);
    }

    #[tokio::test]
    async fn test_expired_cooldown_reads_degraded() {
        let config = BreakerConfig {
            failure_threshold: 1,
            window_secs: 60,
            cooldown_base_ms: 0,
            cooldown_max_ms: 0,
        };
        let registry = registry_with(&["r1"], config).await;
        registry.record_failure("r1").await;
        // Zero cooldown: the open expires immediately, agent is on probation.
        let snap = &registry.snapshot().await[0];
        assert_eq!(snap.health, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_success_closes_breaker_and_resets() {
        let config = BreakerConfig {
            failure_threshold: 1,
            window_secs: 60,
            cooldown_base_ms: 60_000,
            cooldown_max_ms: 120_000,
        };
        let registry = registry_with(&["r1"], config).await;
        registry.record_failure("r1").await;
        assert_eq!(registry.snapshot().await[0].health, HealthState::CircuitOpen);

        registry.record_success("r1").await;
        let snap = &registry.snapshot().await[0];
        assert_eq!(snap.health, HealthState::Healthy);
        assert!(snap.success_rate < 1.0); // 1 success, 1 failure
    }

    #[test]
    fn test_cooldown_doubles_and_caps() {
        let config = BreakerConfig {
            failure_threshold: 5,
            window_secs: 60,
            cooldown_base_ms: 2_000,
            cooldown_max_ms: 10_000,
        };
        assert_eq!(compute_cooldown(&config, 0), 2_000);
        assert_eq!(compute_cooldown(&config, 1), 4_000);
        assert_eq!(compute_cooldown(&config, 2), 8_000);
        assert_eq!(compute_cooldown(&config, 3), 10_000); // capped
    }

    #[tokio::test]
    async fn test_success_rate_default_is_optimistic() {
        let registry = registry_with(&["r1"], BreakerConfig::default()).await;
        let snap = &registry.snapshot().await[0];
        assert_eq!(snap.success_rate, 1.0);
    }
}
