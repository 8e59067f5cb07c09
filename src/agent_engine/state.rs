use serde::Serialize;

use crate::agent_engine::action::Action;
use crate::agent_engine::conversation::Turn;
use crate::llm::types::LlmResponse;
use crate::perception::types::Observation;

/// Phases of one loop iteration. Each variant carries what the next phase needs.
#[derive(Debug, Clone)]
pub enum AgentState {
    Observing,
    Deciding { observation: Observation },
    Validating { observation: Observation, reply: LlmResponse },
    Executing { observation: Observation, reply: LlmResponse, action: Action },
    Recording { turn: Box<Turn> },
    Terminal(SessionOutcome),
}

impl AgentState {
    pub fn name(&self) -> &'static str {
        match self {
            AgentState::Observing => "Observing",
            AgentState::Deciding { .. } => "Deciding",
            AgentState::Validating { .. } => "Validating",
            AgentState::Executing { .. } => "Executing",
            AgentState::Recording { .. } => "Recording",
            AgentState::Terminal(_) => "Terminal",
        }
    }
}

/// How a session ended. Exhaustion is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed { summary: String },
    Impossible { reason: String },
    Exhausted { iterations: u32 },
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Completed { summary } => write!(f, "completed: {summary}"),
            SessionOutcome::Impossible { reason } => write!(f, "impossible: {reason}"),
            SessionOutcome::Exhausted { iterations } => {
                write!(f, "exhausted: no terminal action after {iterations} iterations")
            }
        }
    }
}

/// Returned by `AgentEngine::run`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub objective: String,
    pub outcome: SessionOutcome,
    pub iterations: u32,
}
