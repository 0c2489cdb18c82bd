use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Turns retained per session before the oldest are dropped.
const MAX_TURNS: usize = 50;

/// One completed user interaction: raw input and the synthesized response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// The raw input that started the task.
    pub input: String,
    /// The synthesized final payload.
    pub response: serde_json::Value,
    /// When the turn completed.
    pub recorded_at: DateTime<Utc>,
}

/// Per-session execution state accumulated across tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The session this context belongs to.
    pub session_id: Uuid,
    /// Final payload per completed subtask id.
    pub accumulated_results: HashMap<Uuid, serde_json::Value>,
    /// Bounded history of completed turns, oldest first.
    pub turns: Vec<Turn>,
    /// Total turns processed for this session, including dropped ones.
    pub turn_counter: u64,
    /// When the session context was created.
    pub created_at: DateTime<Utc>,
    /// When the context was last written.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// Create an empty context for a session.
    pub fn new(session_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            accumulated_results: HashMap::new(),
            turns: Vec::new(),
            turn_counter: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the final payload of a completed subtask.
    pub fn record_result(&mut self, subtask_id: Uuid, payload: serde_json::Value) {
        self.updated_at = Utc::now();
        self.accumulated_results.insert(subtask_id, payload);
    }

    /// Record a completed turn, dropping the oldest past the retention cap.
    pub fn record_turn(&mut self, input: impl Into<String>, response: serde_json::Value) {
        self.updated_at = Utc::now();
        self.turn_counter += 1;
        self.turns.push(Turn {
            input: input.into(),
            response,
            recorded_at: self.updated_at,
        });
        if self.turns.len() > MAX_TURNS {
            let excess = self.turns.len() - MAX_TURNS;
            self.turns.drain(..excess);
        }
    }

    /// The most recent `n` turns, oldest first. Used as the planner's
    /// read-only snapshot of prior conversation.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_result() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4());
        let id = Uuid::new_v4();
        ctx.record_result(id, serde_json::json!("done"));
        assert_eq!(ctx.accumulated_results[&id], "done");
    }

    #[test]
    fn test_turn_counter_survives_trimming() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4());
        for i in 0..(MAX_TURNS + 10) {
            ctx.record_turn(format!("input {i}"), serde_json::Value::Null);
        }
        assert_eq!(ctx.turns.len(), MAX_TURNS);
        assert_eq!(ctx.turn_counter, (MAX_TURNS + 10) as u64);
        // Oldest retained turn is the 11th
        assert_eq!(ctx.turns[0].input, "input 10");
    }

    #[test]
    fn test_recent_turns_window() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4());
        ctx.record_turn("a", serde_json::Value::Null);
        ctx.record_turn("b", serde_json::Value::Null);
        ctx.record_turn("c", serde_json::Value::Null);

        let recent = ctx.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].input, "b");
        assert_eq!(recent[1].input, "c");

        assert_eq!(ctx.recent_turns(10).len(), 3);
    }
}
