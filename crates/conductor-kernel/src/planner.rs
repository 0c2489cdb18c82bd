use crate::types::{SubtaskNode, Task};
use async_trait::async_trait;
use conductor_core::{Capability, ConductorError, ConductorResult};
use conductor_session::ExecutionContext;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Turns of history handed to workers as clarifying context.
const HISTORY_TURNS: usize = 3;

/// Decomposes an incoming task into a subtask graph.
///
/// Planners are stateless per call and may read the session context for
/// clarifying prior turns, never mutate it.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the subtask nodes for a task. Must yield at least one
    /// actionable node or fail with a decomposition error.
    async fn decompose(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> ConductorResult<Vec<SubtaskNode>>;
}

/// Keyword-driven planner.
///
/// Classifies the input against an ordered rule list (first match wins),
/// splits top-level conjunctions into independent subtasks, and chains
/// code-generation work after research when both appear, mirroring a
/// gather-then-build information workflow. Segments without a keyword of
/// their own inherit the capability of the preceding segment, so
/// "summarize X and Y" yields two research subtasks.
pub struct HeuristicPlanner {
    rules: Vec<(Regex, Capability)>,
    fallback: Capability,
    ensembles: HashMap<Capability, (u32, bool)>,
    splitter: Regex,
}

impl HeuristicPlanner {
    /// Planner with the default rule set (research, code-generation, chat).
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let rules = vec![
            (
                Regex::new(r"(?i)\b(code|implement|function|script|program|refactor|debug|compile)\b")
                    .expect("static regex"),
                Capability::new("code-generation"),
            ),
            (
                Regex::new(
                    r"(?i)\b(research|search|find|look\s?up|summari[sz]e|investigate|explain|compare)\b",
                )
                .expect("static regex"),
                Capability::new("research"),
            ),
        ];
        #[allow(clippy::expect_used)]
        let splitter = Regex::new(r"(?i)\s+and\s+(?:also\s+)?|\s*;\s*").expect("static regex");
        Self {
            rules,
            fallback: Capability::new("chat"),
            ensembles: HashMap::new(),
            splitter,
        }
    }

    /// Run subtasks of `capability` against `size` agents, requiring the
    /// full ensemble.
    pub fn with_ensemble(mut self, capability: Capability, size: u32) -> Self {
        self.ensembles.insert(capability, (size.max(1), false));
        self
    }

    /// Like [`Self::with_ensemble`] but degrading to the available subset
    /// when fewer agents qualify.
    pub fn with_optional_ensemble(mut self, capability: Capability, size: u32) -> Self {
        self.ensembles.insert(capability, (size.max(1), true));
        self
    }

    fn classify(&self, segment: &str) -> Option<Capability> {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(segment))
            .map(|(_, cap)| cap.clone())
    }

    fn build_node(
        &self,
        task: &Task,
        capability: Capability,
        segment: &str,
        history: &[String],
    ) -> SubtaskNode {
        let payload = serde_json::json!({
            "query": segment,
            "history": history,
        });
        let mut node = SubtaskNode::new(task.id, capability.clone(), payload);
        if let Some((size, optional)) = self.ensembles.get(&capability) {
            node = node.with_ensemble(*size);
            if *optional {
                node = node.optional_ensemble();
            }
        }
        node
    }
}

impl Default for HeuristicPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn decompose(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> ConductorResult<Vec<SubtaskNode>> {
        let input = task.raw_input.trim();
        if input.is_empty() {
            return Err(ConductorError::Decomposition(
                "task input is empty".to_string(),
            ));
        }
        if !input.chars().any(|c| c.is_alphanumeric()) {
            return Err(ConductorError::Decomposition(
                "task input contains no intelligible content".to_string(),
            ));
        }

        let history: Vec<String> = context
            .recent_turns(HISTORY_TURNS)
            .iter()
            .map(|t| t.input.clone())
            .collect();

        let segments: Vec<&str> = self
            .splitter
            .split(input)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        // Classify each segment; keyword-less segments continue the
        // preceding segment's capability.
        let mut nodes: Vec<SubtaskNode> = Vec::new();
        let mut previous: Option<Capability> = None;
        for segment in segments {
            let capability = self
                .classify(segment)
                .or_else(|| previous.clone())
                .unwrap_or_else(|| self.fallback.clone());
            previous = Some(capability.clone());
            nodes.push(self.build_node(task, capability, segment, &history));
        }

        // Gather-then-build: code-generation waits on every research node.
        let research_ids: Vec<Uuid> = nodes
            .iter()
            .filter(|n| n.capability == Capability::new("research"))
            .map(|n| n.id)
            .collect();
        if !research_ids.is_empty() {
            for node in &mut nodes {
                if node.capability == Capability::new("code-generation") {
                    node.dependencies.extend(research_ids.iter().copied());
                }
            }
        }

        debug!(
            task_id = %task.id,
            subtasks = nodes.len(),
            "Planner: decomposition complete"
        );
        Ok(nodes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn task(input: &str) -> Task {
        Task::new(Uuid::new_v4(), input)
    }

    fn empty_context() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_empty_input_is_decomposition_error() {
        let planner = HeuristicPlanner::new();
        let err = planner
            .decompose(&task("   "), &empty_context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "decomposition");
    }

    #[tokio::test]
    async fn test_unintelligible_input_is_decomposition_error() {
        let planner = HeuristicPlanner::new();
        let err = planner
            .decompose(&task("?!... ---"), &empty_context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "decomposition");
    }

    #[tokio::test]
    async fn test_conjunction_splits_into_independent_research() {
        let planner = HeuristicPlanner::new();
        let nodes = planner
            .decompose(
                &task("summarize the quarterly report and the incident postmortem"),
                &empty_context(),
            )
            .await
            .unwrap();

        assert_eq!(nodes.len(), 2);
        for node in &nodes {
            assert_eq!(node.capability, Capability::new("research"));
            assert!(node.dependencies.is_empty());
        }
    }

    #[tokio::test]
    async fn test_code_depends_on_research() {
        let planner = HeuristicPlanner::new();
        let nodes = planner
            .decompose(
                &task("research rate limiting algorithms and implement a token bucket"),
                &empty_context(),
            )
            .await
            .unwrap();

        assert_eq!(nodes.len(), 2);
        let research = nodes
            .iter()
            .find(|n| n.capability == Capability::new("research"))
            .unwrap();
        let code = nodes
            .iter()
            .find(|n| n.capability == Capability::new("code-generation"))
            .unwrap();
        assert!(code.dependencies.contains(&research.id));
    }

    #[tokio::test]
    async fn test_fallback_is_chat() {
        let planner = HeuristicPlanner::new();
        let nodes = planner
            .decompose(&task("good morning"), &empty_context())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].capability, Capability::new("chat"));
    }

    #[tokio::test]
    async fn test_ensemble_configuration_applied() {
        let planner = HeuristicPlanner::new()
            .with_optional_ensemble(Capability::new("research"), 2);
        let nodes = planner
            .decompose(&task("summarize the minutes"), &empty_context())
            .await
            .unwrap();
        assert_eq!(nodes[0].ensemble_size, 2);
        assert!(nodes[0].optional_ensemble);
    }

    #[tokio::test]
    async fn test_history_flows_into_payload() {
        let planner = HeuristicPlanner::new();
        let mut context = empty_context();
        context.record_turn("earlier question", serde_json::json!("earlier answer"));

        let nodes = planner
            .decompose(&task("explain the previous answer"), &context)
            .await
            .unwrap();
        let history = nodes[0].input_payload["history"].as_array().unwrap();
        assert_eq!(history[0], "earlier question");
    }
}
