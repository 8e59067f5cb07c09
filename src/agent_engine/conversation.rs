//! Session transcript and the model-facing view of it.
//!
//! Turns are stored whole, screenshots included. [`Conversation::render_for_model`]
//! recomputes the image window on every call and never touches stored turns.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent_engine::action::Action;
use crate::executor::dispatcher::ExecutionResult;
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl, LlmResponse};
use crate::perception::som_grid::describe_grid;
use crate::perception::types::Observation;

pub const IMAGE_OMITTED: &str = "[Screenshot omitted to keep the request small. Rely on the newer screenshots.]";

const PROTOCOL_REMINDER: &str = "You must respond with exactly one tool call. \
Use task_complete when the objective is done or task_impossible if it cannot be done.";

/// What happened to the action chosen in a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Sent to the device; `success` says whether the device accepted it.
    Executed(ExecutionResult),
    /// Never reached the device (malformed action, bad cell, no tool call).
    Rejected { reason: String },
    /// Terminal action recorded.
    Finished { detail: String },
}

impl Outcome {
    /// Text returned to the model as the tool result.
    pub fn feedback(&self) -> String {
        match self {
            Outcome::Executed(r) if r.success => format!("OK: {}", r.detail),
            Outcome::Executed(r) => format!("FAILED: {}", r.detail),
            Outcome::Rejected { reason } => format!("REJECTED: {reason}. Nothing was done on the device."),
            Outcome::Finished { detail } => detail.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub iteration: u32,
    pub observation: Observation,
    /// Model reply, reduced to at most one tool call.
    pub reply: LlmResponse,
    pub action: Option<Action>,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    objective: String,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            objective: objective.into(),
            turns: Vec::new(),
        }
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Messages for the model with at most `max_images` screenshots, newest kept.
    pub fn render_for_model(&self, max_images: usize) -> Vec<ChatMessage> {
        self.render(None, max_images)
    }

    /// Like [`Self::render_for_model`], followed by the not-yet-recorded
    /// observation. That observation counts toward `max_images`.
    pub fn render_with_observation(&self, pending: &Observation, max_images: usize) -> Vec<ChatMessage> {
        self.render(Some(pending), max_images)
    }

    fn render(&self, pending: Option<&Observation>, max_images: usize) -> Vec<ChatMessage> {
        let total = self.turns.len() + usize::from(pending.is_some());
        let first_kept = image_window_start(total, max_images);

        let mut messages = Vec::with_capacity(2 + self.turns.len() * 3 + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.push(ChatMessage::user(format!("Objective: {}", self.objective)));

        for (idx, turn) in self.turns.iter().enumerate() {
            messages.push(observation_message(turn.iteration, &turn.observation, idx >= first_kept));

            match turn.reply.tool_calls.first() {
                Some(call) => {
                    messages.push(ChatMessage::assistant(turn.reply.content.clone(), Some(vec![call.clone()])));
                    messages.push(ChatMessage::tool(call.id.clone(), turn.outcome.feedback()));
                }
                None => {
                    messages.push(ChatMessage::assistant(turn.reply.content.clone(), None));
                    messages.push(ChatMessage::user(format!(
                        "{} {PROTOCOL_REMINDER}",
                        turn.outcome.feedback()
                    )));
                }
            }
        }

        if let Some(obs) = pending {
            let step = self.turns.last().map_or(1, |t| t.iteration + 1);
            messages.push(observation_message(step, obs, total > first_kept));
        }

        messages
    }
}

/// Index of the first image kept when `total` images compete for `max_images` slots.
pub fn image_window_start(total: usize, max_images: usize) -> usize {
    total.saturating_sub(max_images)
}

fn observation_message(step: u32, obs: &Observation, with_image: bool) -> ChatMessage {
    let mut text = format!(
        "Step {step}. Device screen {}x{}. {}",
        obs.device_size.0,
        obs.device_size.1,
        describe_grid(obs.grid)
    );
    if let Some(elements) = &obs.ui_elements {
        text.push_str("\nInteractive elements:\n");
        text.push_str(elements);
    }

    let picture = if with_image {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: obs.image_data_url.clone(),
                detail: Some("high".into()),
            },
        }
    } else {
        ContentPart::Text {
            text: IMAGE_OMITTED.to_string(),
        }
    };

    ChatMessage::user_parts(vec![ContentPart::Text { text }, picture])
}
