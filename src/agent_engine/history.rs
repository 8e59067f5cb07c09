use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::conversation::Turn;
use crate::agent_engine::state::SessionOutcome;
use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::types::ToolCall;
use crate::perception::som_grid::GridSpec;

/// One line of the session log. Screenshots are never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridSpec>,
}

impl HistoryEntry {
    fn new(kind: &str) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            kind: kind.to_string(),
            iteration: None,
            content: None,
            tool_call: None,
            action: None,
            outcome: None,
            grid: None,
        }
    }

    pub fn objective(objective: &str) -> Self {
        Self {
            content: Some(objective.to_string()),
            ..Self::new("objective")
        }
    }

    pub fn turn(turn: &Turn) -> Self {
        Self {
            ts: turn.timestamp.timestamp_millis(),
            iteration: Some(turn.iteration),
            content: (!turn.reply.content.is_empty()).then(|| turn.reply.content.clone()),
            tool_call: turn.reply.tool_calls.first().cloned(),
            action: turn.action.as_ref().and_then(|a| serde_json::to_value(a).ok()),
            outcome: serde_json::to_value(&turn.outcome).ok(),
            grid: Some(turn.observation.grid),
            ..Self::new("turn")
        }
    }

    pub fn finished(outcome: &SessionOutcome) -> Self {
        Self {
            outcome: serde_json::to_value(outcome).ok(),
            ..Self::new("session_end")
        }
    }
}

/// Append-only JSONL log for one session.
pub struct SessionHistory {
    pub session_id: String,
    file_path: Option<PathBuf>,
}

impl SessionHistory {
    /// Log under `dir`; `None` keeps nothing on disk.
    pub fn with_dir(dir: Option<&Path>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = dir.and_then(|d| match std::fs::create_dir_all(d) {
            Ok(()) => Some(d.join(format!("session_{session_id}.jsonl"))),
            Err(e) => {
                tracing::warn!(dir = %d.display(), error = %e, "cannot create history directory");
                None
            }
        });
        Self {
            session_id,
            file_path,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Append one entry to the JSONL file.
    pub fn append(&self, entry: &HistoryEntry) -> DroidClawResult<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(path = %path.display(), kind = %entry.kind, "history entry flushed");
        Ok(())
    }

    /// Read a session log back.
    pub fn load(path: &Path) -> DroidClawResult<Vec<HistoryEntry>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<HistoryEntry>(l).map_err(DroidClawError::from))
            .collect()
    }
}

/// `~/.local/share/droidclaw/sessions` on Linux, the platform equivalent elsewhere.
pub fn sessions_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("droidclaw").join("sessions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::Action;
    use crate::agent_engine::conversation::Outcome;
    use crate::llm::types::{FunctionCall, LlmResponse};
    use crate::perception::som_grid::CellRef;
    use crate::perception::types::Observation;

    fn turn() -> Turn {
        Turn {
            iteration: 3,
            observation: Observation {
                device_size: (1080, 2400),
                image_size: (360, 800),
                grid: GridSpec::new(9, 20),
                image_data_url: "data:image/png;base64,SECRETPIXELS".into(),
                ui_elements: None,
            },
            reply: LlmResponse {
                content: "Opening Wi-Fi".into(),
                reasoning: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_3".into(),
                    call_type: "function".into(),
                    function: FunctionCall {
                        name: "tap".into(),
                        arguments: r#"{"cell":"E3"}"#.into(),
                    },
                }],
            },
            action: Some(Action::Tap { cell: CellRef::new(5, 3) }),
            outcome: Outcome::Rejected { reason: "Invalid cell: E3".into() },
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_jsonl_round_trip_without_images() {
        let dir = tempfile::tempdir().unwrap();
        let history = SessionHistory::with_dir(Some(dir.path()));
        history.append(&HistoryEntry::objective("Turn off Wi-Fi")).unwrap();
        history.append(&HistoryEntry::turn(&turn())).unwrap();
        history
            .append(&HistoryEntry::finished(&SessionOutcome::Exhausted { iterations: 3 }))
            .unwrap();

        let path = history.file_path().unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("session_"));
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(!raw.contains("SECRETPIXELS"));

        let entries = SessionHistory::load(path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content.as_deref(), Some("Turn off Wi-Fi"));
        assert_eq!(entries[1].iteration, Some(3));
        assert_eq!(entries[1].tool_call.as_ref().unwrap().function.name, "tap");
        assert_eq!(entries[1].action.as_ref().unwrap()["cell"], "E3");
        assert_eq!(entries[1].outcome.as_ref().unwrap()["status"], "rejected");
        assert_eq!(entries[1].grid, Some(GridSpec::new(9, 20)));
        assert_eq!(entries[2].outcome.as_ref().unwrap()["outcome"], "exhausted");
    }

    #[test]
    fn test_disabled_history_writes_nothing() {
        let history = SessionHistory::with_dir(None);
        assert!(history.file_path().is_none());
        history.append(&HistoryEntry::objective("x")).unwrap();
    }
}
