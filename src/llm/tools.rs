use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::types::ToolDef;

/// Loads the Android tool definitions from prompts/tools/android.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_android_tools() -> DroidClawResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/android.json");
    serde_json::from_str(json)
        .map_err(|e| DroidClawError::Config(format!("Failed to parse android tools: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::TOOL_NAMES;

    #[test]
    fn test_schema_matches_action_set() {
        let tools = load_android_tools().unwrap();
        let mut names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        names.sort_unstable();
        let mut expected = TOOL_NAMES.to_vec();
        expected.sort_unstable();
        assert_eq!(names, expected);
        assert!(tools.iter().all(|t| t.def_type == "function"));
    }

    #[test]
    fn test_required_fields_declared() {
        let tools = load_android_tools().unwrap();
        let tap = tools.iter().find(|t| t.function.name == "tap").unwrap();
        assert_eq!(tap.function.parameters["required"], serde_json::json!(["cell"]));
        let swipe = tools.iter().find(|t| t.function.name == "swipe").unwrap();
        assert_eq!(
            swipe.function.parameters["required"],
            serde_json::json!(["start_cell", "end_cell"])
        );
    }
}
