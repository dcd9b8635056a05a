//! Agent Core error types.
//!
//! Tool failures never show up here: the invoker renders them into
//! `TOOL ERROR` blocks the model gets to see. What remains are the ways a
//! `submit` stream can end early.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that end a conversation turn sequence.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model backend failed to start or continue a turn.
    #[error("model backend error: {source}")]
    Backend {
        #[from]
        source: InferenceError,
    },

    /// The model kept requesting tools past the configured budget.
    #[error("turn limit exceeded: {max_turns} model calls without a final answer")]
    TurnLimitExceeded { max_turns: usize },
}
