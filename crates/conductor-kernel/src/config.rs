use crate::critic::CriticConfig;
use crate::supervisor::SupervisorConfig;
use conductor_agent::BreakerConfig;
use serde::{Deserialize, Serialize};

/// Top-level kernel configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Global ceiling on concurrently dispatched subtasks across all tasks.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Backoff before the single routing retry after `NoEligibleAgent`.
    #[serde(default = "default_router_retry_backoff_ms")]
    pub router_retry_backoff_ms: u64,
    /// Execution supervisor settings (timeouts, ensemble wait ceiling).
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Circuit breaker settings for the agent registry.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Critic rubric weights.
    #[serde(default)]
    pub critic: CriticConfig,
}

fn default_global_concurrency() -> usize {
    16
}

fn default_router_retry_backoff_ms() -> u64 {
    250
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            router_retry_backoff_ms: default_router_retry_backoff_ms(),
            supervisor: SupervisorConfig::default(),
            breaker: BreakerConfig::default(),
            critic: CriticConfig::default(),
        }
    }
}
