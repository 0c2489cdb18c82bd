use async_trait::async_trait;
use conductor_core::{Capability, ConductorResult};
use std::time::Duration;

/// The capability contract every worker implements.
///
/// The kernel never inspects how a worker produces its result; it only sees
/// the declared capabilities, the returned payload, and latency/error
/// signals. Implementations must tolerate concurrent invocation up to the
/// `concurrency_limit` declared in their descriptor.
///
/// `deadline` is the absolute time budget for this attempt. The supervisor
/// enforces it externally as well, so exceeding it only wastes the worker's
/// own effort; well-behaved workers use it to bound internal calls.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Execute one subtask attempt and return its result payload.
    async fn invoke(
        &self,
        capability: &Capability,
        input: &serde_json::Value,
        deadline: Duration,
    ) -> ConductorResult<serde_json::Value>;
}
