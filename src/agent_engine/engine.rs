use std::path::PathBuf;
use std::sync::Arc;

use crate::agent_engine::action::Action;
use crate::agent_engine::conversation::{Conversation, Outcome, Turn};
use crate::agent_engine::history::{sessions_dir, HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::IterationBudget;
use crate::agent_engine::state::{AgentState, SessionOutcome, SessionReport};
use crate::config::AppConfig;
use crate::errors::{DroidClawError, DroidClawResult};
use crate::executor::backend::DeviceBackend;
use crate::executor::dispatcher::Executor;
use crate::llm::provider::LlmProvider;
use crate::llm::tools::load_android_tools;
use crate::llm::types::{CallConfig, LlmResponse, ToolDef};
use crate::perception::pipeline;
use crate::perception::types::Observation;

pub const SYSTEM_PROMPT: &str = "\
You are DroidClaw, an agent that operates an Android phone to reach the user's objective.

Every step you receive a screenshot with a labeled grid drawn over it. Columns are letters \
(A, B, ... Z, AA, AB, ...) from left to right, rows are numbers from the top. Refer to screen \
positions only by cell label, e.g. \"E10\". Pick the cell whose center lies on the target.

Rules:
- Call exactly one tool per reply. Plain text replies are not executed.
- Look at the newest screenshot before acting; earlier actions may not have had the expected effect.
- To scroll, swipe in the direction opposite to where you want the content to move.
- Before input_text, tap the text field so it has focus. Only ASCII text can be typed.
- Use launch_app with the package name when you know it; otherwise navigate from the home screen.
- When the objective is reached call task_complete with a short summary.
- If it cannot be reached call task_impossible with the reason.
- Briefly describe what you see and why you chose the action before calling the tool.";

/// Runs one objective at a time: observe, ask the model, validate, act, record.
pub struct AgentEngine {
    config: Arc<AppConfig>,
    device: Arc<dyn DeviceBackend>,
    executor: Executor,
    provider: Arc<dyn LlmProvider>,
    call_cfg: CallConfig,
    tools: Vec<ToolDef>,
    history_dir: Option<PathBuf>,
}

impl AgentEngine {
    pub fn new(
        config: Arc<AppConfig>,
        device: Arc<dyn DeviceBackend>,
        provider: Arc<dyn LlmProvider>,
        call_cfg: CallConfig,
    ) -> DroidClawResult<Self> {
        let executor = Executor::new(device.clone(), &config.device);
        let history_dir = if config.agent.persist_history {
            sessions_dir()
        } else {
            None
        };
        Ok(Self {
            executor,
            device,
            provider,
            call_cfg,
            tools: load_android_tools()?,
            history_dir,
            config,
        })
    }

    /// Write session logs to `dir` instead of the default location; `None` disables them.
    pub fn with_history_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.history_dir = dir;
        self
    }

    /// Drive the device toward `objective` until a terminal action or the
    /// iteration budget ends the session.
    ///
    /// Returns `Err` only for failures that make continuing pointless: an
    /// unreachable device or a failed model call.
    pub async fn run(&self, objective: &str) -> DroidClawResult<SessionReport> {
        let history = SessionHistory::with_dir(self.history_dir.as_deref());
        let mut conversation = Conversation::new(SYSTEM_PROMPT, objective);
        let mut budget = IterationBudget::new(self.config.agent.max_iterations);
        let max_images = self.config.agent.max_images;

        tracing::info!(
            session = %history.session_id,
            objective = %objective,
            provider = self.provider.name(),
            model = %self.call_cfg.model,
            max_iterations = self.config.agent.max_iterations,
            history = ?history.file_path(),
            "session started"
        );
        log_history(&history, &HistoryEntry::objective(objective));

        let mut state = AgentState::Observing;
        loop {
            let iteration = budget.current();
            let from = state.name();
            state = match state {
                AgentState::Observing => {
                    if budget.is_exhausted() {
                        tracing::warn!(iterations = budget.used(), "iteration budget exhausted");
                        AgentState::Terminal(SessionOutcome::Exhausted {
                            iterations: budget.used(),
                        })
                    } else {
                        let observation = self.observe().await?;
                        tracing::info!(
                            iteration,
                            grid = %format!("{}x{}", observation.grid.columns, observation.grid.rows),
                            "screen observed"
                        );
                        AgentState::Deciding { observation }
                    }
                }

                AgentState::Deciding { observation } => {
                    let messages = conversation.render_with_observation(&observation, max_images);
                    let mut reply = self
                        .provider
                        .chat(messages, self.tools.clone(), &self.call_cfg)
                        .await?;
                    if reply.tool_calls.len() > 1 {
                        tracing::warn!(
                            iteration,
                            dropped = reply.tool_calls.len() - 1,
                            "model returned several tool calls, keeping the first"
                        );
                        reply.tool_calls.truncate(1);
                    }
                    if let Some(call) = reply.tool_calls.first_mut() {
                        if call.id.is_empty() {
                            call.id = format!("call_{iteration}");
                        }
                    }
                    if !reply.reasoning.is_empty() {
                        tracing::debug!(iteration, reasoning = %reply.reasoning, "model reasoning");
                    }
                    tracing::info!(
                        iteration,
                        tool = reply.tool_calls.first().map_or("<none>", |c| c.function.name.as_str()),
                        "model replied"
                    );
                    AgentState::Validating { observation, reply }
                }

                AgentState::Validating { observation, reply } => {
                    let parsed = match reply.tool_calls.first() {
                        Some(call) => Action::from_tool_call(call),
                        None => Err(DroidClawError::NoActionChosen),
                    };
                    match parsed {
                        Ok(action) if action.is_terminal() => {
                            let detail = match &action {
                                Action::TaskComplete { summary } => format!("Task complete: {summary}"),
                                Action::TaskImpossible { reason } => format!("Task impossible: {reason}"),
                                _ => String::new(),
                            };
                            tracing::info!(iteration, tool = action.tool_name(), "terminal action chosen");
                            AgentState::Recording {
                                turn: new_turn(iteration, observation, reply, Some(action), Outcome::Finished { detail }),
                            }
                        }
                        Ok(action) => {
                            tracing::info!(iteration, ?action, "action validated");
                            AgentState::Executing {
                                observation,
                                reply,
                                action,
                            }
                        }
                        Err(e) => {
                            tracing::warn!(iteration, error = %e, "action rejected");
                            AgentState::Recording {
                                turn: new_turn(
                                    iteration,
                                    observation,
                                    reply,
                                    None,
                                    Outcome::Rejected { reason: e.to_string() },
                                ),
                            }
                        }
                    }
                }

                AgentState::Executing {
                    observation,
                    reply,
                    action,
                } => {
                    let outcome = match self.executor.execute(&action, &observation).await {
                        Ok(result) => Outcome::Executed(result),
                        Err(e) if e.is_turn_local() => {
                            tracing::warn!(iteration, error = %e, "action rejected at execution");
                            Outcome::Rejected { reason: e.to_string() }
                        }
                        Err(e) => {
                            tracing::error!(iteration, error = %e, "device failure, aborting session");
                            return Err(e);
                        }
                    };
                    tracing::info!(iteration, outcome = %outcome.feedback(), "action finished");
                    AgentState::Recording {
                        turn: new_turn(iteration, observation, reply, Some(action), outcome),
                    }
                }

                AgentState::Recording { turn } => {
                    log_history(&history, &HistoryEntry::turn(&turn));
                    let finished = match &turn.action {
                        Some(Action::TaskComplete { summary }) => Some(SessionOutcome::Completed {
                            summary: summary.clone(),
                        }),
                        Some(Action::TaskImpossible { reason }) => Some(SessionOutcome::Impossible {
                            reason: reason.clone(),
                        }),
                        _ => None,
                    };
                    conversation.append(*turn);
                    budget.record();
                    tracing::debug!(iteration, remaining = budget.remaining(), "turn recorded");
                    match finished {
                        Some(outcome) => AgentState::Terminal(outcome),
                        None => AgentState::Observing,
                    }
                }

                AgentState::Terminal(outcome) => {
                    log_history(&history, &HistoryEntry::finished(&outcome));
                    tracing::info!(
                        session = %history.session_id,
                        turns = conversation.len(),
                        outcome = %outcome,
                        "session ended"
                    );
                    return Ok(SessionReport {
                        session_id: history.session_id.clone(),
                        objective: objective.to_string(),
                        outcome,
                        iterations: budget.used(),
                    });
                }
            };
            tracing::debug!(iteration, from, to = state.name(), "state transition");
        }
    }

    /// Capture the screen and turn it into a gridded observation.
    async fn observe(&self) -> DroidClawResult<Observation> {
        pipeline::capture(
            self.device.as_ref(),
            &self.config.grid,
            self.config.agent.include_ui_elements,
        )
        .await
    }
}

fn new_turn(
    iteration: u32,
    observation: Observation,
    reply: LlmResponse,
    action: Option<Action>,
    outcome: Outcome,
) -> Box<Turn> {
    Box::new(Turn {
        iteration,
        observation,
        reply,
        action,
        outcome,
        timestamp: chrono::Utc::now(),
    })
}

fn log_history(history: &SessionHistory, entry: &HistoryEntry) {
    if let Err(e) = history.append(entry) {
        tracing::warn!(error = %e, "failed to write session history");
    }
}
