use conductor_core::Capability;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Static registration record for a worker.
///
/// Registered once at startup or dynamically through the registration API;
/// health and load are tracked separately by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique identifier; duplicate registrations are rejected.
    pub agent_id: String,
    /// Capabilities this worker can serve.
    pub capabilities: HashSet<Capability>,
    /// Maximum concurrent invocations this worker tolerates.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: u32,
}

fn default_concurrency_limit() -> u32 {
    4
}

impl AgentDescriptor {
    /// Create a descriptor with the given id and capabilities.
    pub fn new(
        agent_id: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: capabilities.into_iter().collect(),
            concurrency_limit: default_concurrency_limit(),
        }
    }

    /// Override the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Whether this worker serves the given capability.
    pub fn serves(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Health of a registered agent as observed by the execution supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Operating normally.
    Healthy,
    /// Elevated recent failure rate; still routable, ranked below healthy peers.
    Degraded,
    /// Excluded from routing until the breaker cooldown elapses.
    CircuitOpen,
}

/// Point-in-time view of one agent, produced by [`crate::AgentRegistry`]
/// for the router. Pure data; holding one has no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    /// Agent identifier.
    pub agent_id: String,
    /// Declared capabilities.
    pub capabilities: HashSet<Capability>,
    /// Declared concurrency limit.
    pub concurrency_limit: u32,
    /// Effective health at snapshot time (cooldown expiry applied).
    pub health: HealthState,
    /// Invocations currently in flight.
    pub in_flight: u32,
    /// Fraction of past attempts that succeeded; 1.0 with no history.
    pub success_rate: f64,
}

impl AgentSnapshot {
    /// Whether the agent has a free concurrency slot.
    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.concurrency_limit
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serves() {
        let desc = AgentDescriptor::new("r1", vec![Capability::new("research")]);
        assert!(desc.serves(&Capability::new("research")));
        assert!(!desc.serves(&Capability::new("chat")));
    }

    #[test]
    fn test_concurrency_limit_floor() {
        let desc =
            AgentDescriptor::new("r1", Vec::<Capability>::new()).with_concurrency_limit(0);
        assert_eq!(desc.concurrency_limit, 1);
    }

    #[test]
    fn test_descriptor_deserialize_defaults() {
        let json = r#"{"agent_id": "c1", "capabilities": ["chat"]}"#;
        let desc: AgentDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.concurrency_limit, 4);
        assert!(desc.serves(&Capability::new("chat")));
    }

    #[test]
    fn test_health_state_serialization() {
        let json = serde_json::to_string(&HealthState::CircuitOpen).unwrap();
        assert_eq!(json, "\"circuit_open\"");
    }
}
