//! Typed actions parsed from the model's tool calls.
//!
//! The tool schema in `prompts/tools/android.json` and [`Action::parse`] are the
//! only contract between model output and the device. Anything `parse` cannot
//! express is rejected with [`DroidClawError::MalformedAction`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::types::ToolCall;
use crate::perception::som_grid::CellRef;

/// Every tool name the model may call.
pub const TOOL_NAMES: [&str; 12] = [
    "tap",
    "tap_sequence",
    "swipe",
    "input_text",
    "press_home",
    "press_back",
    "press_enter",
    "press_recent_apps",
    "launch_app",
    "wait",
    "task_complete",
    "task_impossible",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Tap {
        cell: CellRef,
    },
    TapSequence {
        cells: Vec<CellRef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u32>,
    },
    Swipe {
        start: CellRef,
        end: CellRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u32>,
    },
    InputText {
        text: String,
    },
    PressHome,
    PressBack,
    PressEnter,
    PressRecentApps,
    LaunchApp {
        package: String,
    },
    Wait {
        seconds: f64,
    },
    TaskComplete {
        summary: String,
    },
    TaskImpossible {
        reason: String,
    },
}

#[derive(Deserialize)]
struct TapArgs {
    cell: CellRef,
}

#[derive(Deserialize)]
struct TapSequenceArgs {
    cells: Vec<CellRef>,
    #[serde(default)]
    delay_ms: Option<u32>,
}

#[derive(Deserialize)]
struct SwipeArgs {
    start_cell: CellRef,
    end_cell: CellRef,
    #[serde(default)]
    duration_ms: Option<u32>,
}

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Deserialize)]
struct LaunchArgs {
    package: String,
}

#[derive(Deserialize)]
struct WaitArgs {
    seconds: f64,
}

#[derive(Deserialize)]
struct SummaryArgs {
    summary: String,
}

#[derive(Deserialize)]
struct ReasonArgs {
    reason: String,
}

fn args<T: DeserializeOwned>(tool: &str, value: &serde_json::Value) -> DroidClawResult<T> {
    T::deserialize(value).map_err(|e| DroidClawError::MalformedAction(format!("{tool}: {e}")))
}

impl Action {
    /// Validate `arguments` against the schema for `tool` and build the action.
    pub fn parse(tool: &str, arguments: &serde_json::Value) -> DroidClawResult<Self> {
        if !arguments.is_object() {
            return Err(DroidClawError::MalformedAction(format!(
                "{tool}: arguments must be a JSON object"
            )));
        }

        let action = match tool {
            "tap" => {
                let a: TapArgs = args(tool, arguments)?;
                Action::Tap { cell: a.cell }
            }
            "tap_sequence" => {
                let a: TapSequenceArgs = args(tool, arguments)?;
                if a.cells.is_empty() {
                    return Err(DroidClawError::MalformedAction(
                        "tap_sequence: cells must not be empty".into(),
                    ));
                }
                Action::TapSequence {
                    cells: a.cells,
                    delay_ms: a.delay_ms,
                }
            }
            "swipe" => {
                let a: SwipeArgs = args(tool, arguments)?;
                Action::Swipe {
                    start: a.start_cell,
                    end: a.end_cell,
                    duration_ms: a.duration_ms,
                }
            }
            "input_text" => Action::InputText {
                text: args::<TextArgs>(tool, arguments)?.text,
            },
            "press_home" => Action::PressHome,
            "press_back" => Action::PressBack,
            "press_enter" => Action::PressEnter,
            "press_recent_apps" => Action::PressRecentApps,
            "launch_app" => {
                let package = args::<LaunchArgs>(tool, arguments)?.package;
                if package.trim().is_empty() {
                    return Err(DroidClawError::MalformedAction(
                        "launch_app: package must not be empty".into(),
                    ));
                }
                Action::LaunchApp { package }
            }
            "wait" => {
                let seconds = args::<WaitArgs>(tool, arguments)?.seconds;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(DroidClawError::MalformedAction(format!(
                        "wait: seconds must be a non-negative number, got {seconds}"
                    )));
                }
                Action::Wait { seconds }
            }
            "task_complete" => Action::TaskComplete {
                summary: args::<SummaryArgs>(tool, arguments)?.summary,
            },
            "task_impossible" => Action::TaskImpossible {
                reason: args::<ReasonArgs>(tool, arguments)?.reason,
            },
            other => {
                return Err(DroidClawError::MalformedAction(format!(
                    "unknown tool '{other}'"
                )));
            }
        };
        Ok(action)
    }

    /// Parse a tool call whose arguments are still a JSON string.
    pub fn from_tool_call(call: &ToolCall) -> DroidClawResult<Self> {
        let raw = call.function.arguments.trim();
        let value: serde_json::Value = if raw.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                DroidClawError::MalformedAction(format!(
                    "{}: arguments are not valid JSON: {e}",
                    call.function.name
                ))
            })?
        };
        Self::parse(&call.function.name, &value)
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::TapSequence { .. } => "tap_sequence",
            Action::Swipe { .. } => "swipe",
            Action::InputText { .. } => "input_text",
            Action::PressHome => "press_home",
            Action::PressBack => "press_back",
            Action::PressEnter => "press_enter",
            Action::PressRecentApps => "press_recent_apps",
            Action::LaunchApp { .. } => "launch_app",
            Action::Wait { .. } => "wait",
            Action::TaskComplete { .. } => "task_complete",
            Action::TaskImpossible { .. } => "task_impossible",
        }
    }

    /// `task_complete` and `task_impossible` end the session and never reach the device.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::TaskComplete { .. } | Action::TaskImpossible { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FunctionCall;
    use serde_json::json;

    fn malformed(result: DroidClawResult<Action>) -> String {
        match result {
            Err(DroidClawError::MalformedAction(msg)) => msg,
            other => panic!("expected MalformedAction, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_cell_actions() {
        assert_eq!(
            Action::parse("tap", &json!({"cell": "E10"})).unwrap(),
            Action::Tap { cell: CellRef::new(5, 10) }
        );
        assert_eq!(
            Action::parse("swipe", &json!({"start_cell": "E15", "end_cell": "E5"})).unwrap(),
            Action::Swipe {
                start: CellRef::new(5, 15),
                end: CellRef::new(5, 5),
                duration_ms: None,
            }
        );
        assert_eq!(
            Action::parse("tap_sequence", &json!({"cells": ["A1", "B2"], "delay_ms": 200})).unwrap(),
            Action::TapSequence {
                cells: vec![CellRef::new(1, 1), CellRef::new(2, 2)],
                delay_ms: Some(200),
            }
        );
    }

    #[test]
    fn test_parse_passthrough_actions() {
        assert_eq!(
            Action::parse("input_text", &json!({"text": "hello world"})).unwrap(),
            Action::InputText { text: "hello world".into() }
        );
        assert_eq!(
            Action::parse("launch_app", &json!({"package": "com.android.settings"})).unwrap(),
            Action::LaunchApp { package: "com.android.settings".into() }
        );
        assert_eq!(Action::parse("press_back", &json!({})).unwrap(), Action::PressBack);
        assert_eq!(
            Action::parse("wait", &json!({"seconds": 1.5})).unwrap(),
            Action::Wait { seconds: 1.5 }
        );
    }

    #[test]
    fn test_every_tool_name_is_parseable() {
        let samples = json!({
            "cell": "A1", "cells": ["A1"], "start_cell": "A1", "end_cell": "A2",
            "text": "x", "package": "p", "seconds": 0, "summary": "s", "reason": "r"
        });
        for name in TOOL_NAMES {
            let action = Action::parse(name, &samples).unwrap();
            assert_eq!(action.tool_name(), name);
        }
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let msg = malformed(Action::parse("scroll_down", &json!({})));
        assert!(msg.contains("scroll_down"));
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        malformed(Action::parse("tap", &json!({})));
        malformed(Action::parse("swipe", &json!({"start_cell": "A1"})));
        malformed(Action::parse("tap", &json!({"cell": 5})));
        malformed(Action::parse("wait", &json!({"seconds": "2"})));
        malformed(Action::parse("input_text", &json!({"text": null})));
        malformed(Action::parse("tap", &json!(["A1"])));
    }

    #[test]
    fn test_out_of_range_values() {
        malformed(Action::parse("wait", &json!({"seconds": -1})));
        malformed(Action::parse("tap_sequence", &json!({"cells": []})));
        malformed(Action::parse("swipe", &json!({"start_cell": "A1", "end_cell": "A2", "duration_ms": -5})));
        malformed(Action::parse("launch_app", &json!({"package": "  "})));
    }

    #[test]
    fn test_bad_cell_label_is_malformed() {
        malformed(Action::parse("tap", &json!({"cell": "e10"})));
        malformed(Action::parse("tap", &json!({"cell": "A0"})));
        malformed(Action::parse("tap", &json!({"cell": "A01"})));
    }

    #[test]
    fn test_out_of_grid_cell_still_parses() {
        // Bounds are a resolve-time concern.
        assert_eq!(
            Action::parse("tap", &json!({"cell": "AA5"})).unwrap(),
            Action::Tap { cell: CellRef::new(27, 5) }
        );
    }

    #[test]
    fn test_extra_fields_ignored() {
        assert_eq!(
            Action::parse("press_home", &json!({"why": "reset"})).unwrap(),
            Action::PressHome
        );
    }

    #[test]
    fn test_from_tool_call() {
        let call = |name: &str, args: &str| ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: args.into(),
            },
        };
        assert_eq!(
            Action::from_tool_call(&call("task_complete", r#"{"summary":"Wi-Fi is off"}"#)).unwrap(),
            Action::TaskComplete { summary: "Wi-Fi is off".into() }
        );
        assert_eq!(Action::from_tool_call(&call("press_home", "")).unwrap(), Action::PressHome);
        malformed(Action::from_tool_call(&call("tap", "{\"cell\":")));
        malformed(Action::from_tool_call(&call("tap", "\"A1\"")));
    }

    #[test]
    fn test_terminal_actions() {
        assert!(Action::TaskComplete { summary: String::new() }.is_terminal());
        assert!(Action::TaskImpossible { reason: String::new() }.is_terminal());
        assert!(!Action::Wait { seconds: 0.0 }.is_terminal());
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_value(Action::Tap { cell: CellRef::new(3, 4) }).unwrap();
        assert_eq!(json, json!({"action": "tap", "cell": "C4"}));
    }
}
