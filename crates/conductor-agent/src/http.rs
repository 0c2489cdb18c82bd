use crate::handler::AgentHandler;
use async_trait::async_trait;
use conductor_core::{Capability, ConductorError, ConductorResult};
use std::time::Duration;

/// An [`AgentHandler`] backed by an out-of-process worker reachable over
/// HTTP. The worker receives `{"capability": ..., "input": ...}` as a POST
/// body and replies with the result payload as its JSON body.
pub struct HttpAgent {
    agent_id: String,
    endpoint: String,
    http: reqwest::Client,
}

impl HttpAgent {
    /// Create a handler POSTing invocations to `endpoint`.
    pub fn new(agent_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AgentHandler for HttpAgent {
    async fn invoke(
        &self,
        capability: &Capability,
        input: &serde_json::Value,
        deadline: Duration,
    ) -> ConductorResult<serde_json::Value> {
        let body = serde_json::json!({
            "capability": capability,
            "input": input,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConductorError::AgentTimeout {
                        agent_id: self.agent_id.clone(),
                        timeout_ms: deadline.as_millis() as u64,
                    }
                } else {
                    ConductorError::AgentInvocation {
                        agent_id: self.agent_id.clone(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConductorError::AgentInvocation {
                agent_id: self.agent_id.clone(),
                detail: format!("{status}: {detail}"),
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ConductorError::AgentInvocation {
                agent_id: self.agent_id.clone(),
                detail: format!("invalid response body: {e}"),
            })
    }
}
