use crate::types::CandidateResult;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Rubric weights for scoring competing candidates.
///
/// Deployments that prize speed raise `latency_weight`; those that prize
/// consensus raise `agreement_weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticConfig {
    /// Weight of the completeness heuristic (payload length vs the longest).
    #[serde(default = "default_completeness_weight")]
    pub completeness_weight: f64,
    /// Weight of token-overlap agreement with the other candidates.
    #[serde(default = "default_agreement_weight")]
    pub agreement_weight: f64,
    /// Weight of the latency bonus (faster is better).
    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,
}

fn default_completeness_weight() -> f64 {
    0.5
}
fn default_agreement_weight() -> f64 {
    0.3
}
fn default_latency_weight() -> f64 {
    0.2
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            completeness_weight: default_completeness_weight(),
            agreement_weight: default_agreement_weight(),
            latency_weight: default_latency_weight(),
        }
    }
}

/// Scores and selects among competing candidate results for one subtask.
///
/// Scoring is a pure function of the candidate set, so evaluation is
/// reproducible given the same inputs.
#[derive(Clone)]
pub struct Critic {
    config: CriticConfig,
}

impl Critic {
    /// Create a critic with the given rubric weights.
    pub fn new(config: CriticConfig) -> Self {
        Self { config }
    }

    /// Select the final result for a subtask.
    ///
    /// Every viable candidate is scored before selection; the highest score
    /// wins, ties broken by lowest latency, then by router rank, then by
    /// agent id. Returns `NoViableResultError` when no candidate is usable.
    pub fn select(
        &self,
        subtask_id: Uuid,
        candidates: Vec<CandidateResult>,
    ) -> ConductorResult<CandidateResult> {
        let mut viable: Vec<CandidateResult> = candidates
            .iter()
            .filter(|c| c.is_viable())
            .cloned()
            .collect();

        if viable.is_empty() {
            let detail = if candidates.is_empty() {
                "no candidates produced".to_string()
            } else {
                candidates
                    .iter()
                    .map(|c| {
                        format!(
                            "{}: {}",
                            c.agent_id,
                            c.error.as_deref().unwrap_or("empty payload")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ConductorError::NoViableResult { subtask_id, detail });
        }

        self.score_all(&mut viable);

        viable.sort_by(|a, b| {
            let sa = a.score.unwrap_or(f64::MIN);
            let sb = b.score.unwrap_or(f64::MIN);
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.latency_ms.cmp(&b.latency_ms))
                .then(a.router_rank.cmp(&b.router_rank))
                .then(a.agent_id.cmp(&b.agent_id))
        });

        Ok(viable.remove(0))
    }

    /// Assign a rubric score to every candidate in the slice.
    fn score_all(&self, candidates: &mut [CandidateResult]) {
        let texts: Vec<String> = candidates.iter().map(|c| payload_text(&c.payload)).collect();
        let token_sets: Vec<HashSet<String>> = texts.iter().map(|t| tokens(t)).collect();

        let max_len = texts.iter().map(String::len).max().unwrap_or(1).max(1);
        let max_latency = candidates
            .iter()
            .map(|c| c.latency_ms)
            .max()
            .unwrap_or(1)
            .max(1);

        let n = candidates.len();
        for i in 0..n {
            let completeness = texts[i].len() as f64 / max_len as f64;

            let agreement = if n == 1 {
                1.0
            } else {
                let total: f64 = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| jaccard(&token_sets[i], &token_sets[j]))
                    .sum();
                total / (n - 1) as f64
            };

            let latency_bonus = 1.0 - candidates[i].latency_ms as f64 / max_latency as f64;

            candidates[i].score = Some(
                self.config.completeness_weight * completeness
                    + self.config.agreement_weight * agreement
                    + self.config.latency_weight * latency_bonus,
            );
        }
    }
}

/// Text representation of a payload for the scoring heuristics.
fn payload_text(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}
