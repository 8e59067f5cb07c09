use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use droidclaw::agent_engine::engine::AgentEngine;
use droidclaw::agent_engine::history::SessionHistory;
use droidclaw::agent_engine::state::SessionOutcome;
use droidclaw::config::AppConfig;
use droidclaw::errors::{DroidClawError, DroidClawResult};
use droidclaw::executor::backend::{DeviceBackend, KeyCode};
use droidclaw::llm::provider::LlmProvider;
use droidclaw::llm::types::{
    CallConfig, ChatMessage, ContentPart, FunctionCall, LlmResponse, MessageContent, ToolCall,
    ToolDef,
};
use droidclaw::perception::screenshot::encode_png;

// ── Fakes ─────────────────────────────────────────────────────────────────────

/// 400x800 phone screen; with 40 px cells that is a 10x20 grid.
struct FakePhone {
    png: Vec<u8>,
    calls: Mutex<Vec<String>>,
    unplugged: bool,
    /// uiautomator XML; `None` makes the dump fail like a screen with no window.
    ui_xml: Option<String>,
}

impl FakePhone {
    fn new() -> Self {
        let img = image::RgbaImage::from_pixel(400, 800, image::Rgba([30, 30, 30, 255]));
        Self {
            png: encode_png(&img).unwrap(),
            calls: Mutex::new(Vec::new()),
            unplugged: false,
            ui_xml: None,
        }
    }

    fn with_ui(xml: &str) -> Self {
        Self {
            ui_xml: Some(xml.into()),
            ..Self::new()
        }
    }

    /// adb exits 0 but prints an error instead of PNG data.
    fn garbled() -> Self {
        Self {
            png: b"error: closed\n".to_vec(),
            ..Self::new()
        }
    }

    fn unplugged() -> Self {
        Self {
            unplugged: true,
            ..Self::new()
        }
    }

    fn log(&self, call: String) -> DroidClawResult<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceBackend for FakePhone {
    async fn capture_screen(&self) -> DroidClawResult<Vec<u8>> {
        if self.unplugged {
            return Err(DroidClawError::DeviceUnavailable("no devices/emulators found".into()));
        }
        Ok(self.png.clone())
    }

    async fn tap(&self, x: u32, y: u32) -> DroidClawResult<()> {
        self.log(format!("tap {x} {y}"))
    }

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> DroidClawResult<()> {
        self.log(format!("swipe {},{} -> {},{} {duration_ms}ms", from.0, from.1, to.0, to.1))
    }

    async fn input_text(&self, text: &str) -> DroidClawResult<()> {
        self.log(format!("text {text}"))
    }

    async fn press_key(&self, key: KeyCode) -> DroidClawResult<()> {
        self.log(format!("key {}", key.code()))
    }

    async fn launch_app(&self, package: &str) -> DroidClawResult<()> {
        if package == "com.example.missing" {
            return Err(DroidClawError::DeviceCommand(format!(
                "no launchable activity for package '{package}'"
            )));
        }
        self.log(format!("launch {package}"))
    }

    async fn list_devices(&self) -> DroidClawResult<Vec<String>> {
        Ok(vec!["fake-phone".into()])
    }

    async fn screen_size(&self) -> DroidClawResult<(u32, u32)> {
        Ok((400, 800))
    }

    async fn dump_ui_hierarchy(&self) -> DroidClawResult<String> {
        self.ui_xml
            .clone()
            .ok_or_else(|| DroidClawError::DeviceCommand("uiautomator dump: null root node".into()))
    }
}

/// Replays canned replies and keeps every request it receives.
/// Once the script runs out it keeps pressing back.
struct ScriptedModel {
    replies: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    /// 1-based request number that fails with a provider error.
    fail_at: Option<usize>,
}

impl ScriptedModel {
    fn new(replies: Vec<LlmResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            fail_at: None,
        }
    }

    fn failing_at(request: usize, replies: Vec<LlmResponse>) -> Self {
        Self {
            fail_at: Some(request),
            ..Self::new(replies)
        }
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        _cfg: &CallConfig,
    ) -> DroidClawResult<LlmResponse> {
        assert_eq!(tools.len(), 12);
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(messages);
            requests.len()
        };
        if self.fail_at == Some(count) {
            return Err(DroidClawError::LlmProvider("500 Internal Server Error: upstream timeout".into()));
        }
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| reply("press_back", json!({}))))
    }
}

fn reply(tool: &str, args: serde_json::Value) -> LlmResponse {
    LlmResponse {
        content: format!("Calling {tool}"),
        reasoning: String::new(),
        tool_calls: vec![tool_call(tool, args)],
    }
}

fn tool_call(tool: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{tool}"),
        call_type: "function".into(),
        function: FunctionCall {
            name: tool.into(),
            arguments: args.to_string(),
        },
    }
}

fn text_only(text: &str) -> LlmResponse {
    LlmResponse {
        content: text.into(),
        ..Default::default()
    }
}

fn config(max_iterations: u32, max_images: usize) -> Arc<AppConfig> {
    let mut cfg = AppConfig::default();
    cfg.agent.max_iterations = max_iterations;
    cfg.agent.max_images = max_images;
    cfg.agent.persist_history = false;
    Arc::new(cfg)
}

fn engine(cfg: Arc<AppConfig>, phone: &Arc<FakePhone>, model: &Arc<ScriptedModel>) -> AgentEngine {
    let call_cfg = CallConfig {
        model: "test-model".into(),
        stream: false,
        temperature: 0.0,
    };
    AgentEngine::new(cfg, phone.clone(), model.clone(), call_cfg)
        .unwrap()
        .with_history_dir(None)
}

fn observation_texts(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => Some(parts),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.clone()),
            ContentPart::ImageUrl { .. } => None,
        })
        .collect()
}

fn tool_messages(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == "tool")
        .filter_map(|m| match &m.content {
            MessageContent::Text(t) => Some(t.clone()),
            MessageContent::Parts(_) => None,
        })
        .collect()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tap_then_complete() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("tap", json!({"cell": "A1"})),
        reply("task_complete", json!({"summary": "Opened the drawer"})),
    ]));

    let report = engine(config(10, 5), &phone, &model).run("Open the drawer").await.unwrap();

    assert_eq!(
        report.outcome,
        SessionOutcome::Completed {
            summary: "Opened the drawer".into()
        }
    );
    assert_eq!(report.iterations, 2);
    assert_eq!(phone.calls(), vec!["tap 20 20"]);

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(tool_messages(&requests[1]), vec!["OK: Tapped A1 at (20, 20)"]);
}

#[tokio::test]
async fn test_unknown_tool_is_a_noop_turn() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("fly_to_moon", json!({})),
        reply("task_complete", json!({"summary": "done"})),
    ]));

    let report = engine(config(10, 5), &phone, &model).run("anything").await.unwrap();

    assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
    assert_eq!(report.iterations, 2);
    assert!(phone.calls().is_empty());
    let feedback = tool_messages(&model.requests()[1]);
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].starts_with("REJECTED: Malformed action: unknown tool 'fly_to_moon'"));
}

#[tokio::test]
async fn test_missing_tool_call_is_recorded_and_loop_continues() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        text_only("I would tap the settings icon."),
        reply("task_impossible", json!({"reason": "Settings app is not installed"})),
    ]));

    let report = engine(config(10, 5), &phone, &model).run("Open settings").await.unwrap();

    assert_eq!(
        report.outcome,
        SessionOutcome::Impossible {
            reason: "Settings app is not installed".into()
        }
    );
    let second = &model.requests()[1];
    let reminder = second.iter().any(|m| {
        m.role == "user"
            && matches!(&m.content, MessageContent::Text(t)
                if t.contains("No action chosen") && t.contains("exactly one tool call"))
    });
    assert!(reminder);
}

#[tokio::test]
async fn test_budget_exhaustion_is_an_outcome() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let report = engine(config(3, 5), &phone, &model).run("never finishes").await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted { iterations: 3 });
    assert_eq!(report.iterations, 3);
    assert_eq!(phone.calls(), vec!["key 4", "key 4", "key 4"]);
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn test_out_of_grid_cell_never_reaches_device() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("tap", json!({"cell": "Z99"})),
        reply("swipe", json!({"start_cell": "E15", "end_cell": "E5"})),
        reply("task_complete", json!({"summary": "scrolled"})),
    ]));

    let report = engine(config(10, 5), &phone, &model).run("scroll").await.unwrap();

    assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
    assert_eq!(report.iterations, 3);
    assert_eq!(phone.calls(), vec!["swipe 180,580 -> 180,180 300ms"]);
    let feedback = tool_messages(&model.requests()[1]);
    assert!(feedback[0].starts_with("REJECTED: Invalid cell: Z99 is outside the 10x20 grid"));
}

#[tokio::test]
async fn test_device_command_failure_is_reported_to_model() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("launch_app", json!({"package": "com.example.missing"})),
        reply("launch_app", json!({"package": "com.android.settings"})),
        reply("task_complete", json!({"summary": "opened"})),
    ]));

    let report = engine(config(10, 5), &phone, &model).run("open settings").await.unwrap();

    assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
    assert_eq!(phone.calls(), vec!["launch com.android.settings"]);
    let feedback = tool_messages(&model.requests()[1]);
    assert!(feedback[0].starts_with("FAILED: Device command failed: no launchable activity"));
}

#[tokio::test]
async fn test_unreachable_device_aborts_session() {
    let phone = Arc::new(FakePhone::unplugged());
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let err = engine(config(10, 5), &phone, &model).run("anything").await.unwrap_err();

    assert!(matches!(err, DroidClawError::DeviceUnavailable(_)));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn test_image_window_bounds_every_request() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let report = engine(config(8, 2), &phone, &model).run("keep going").await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::Exhausted { iterations: 8 });

    for (i, request) in model.requests().iter().enumerate() {
        let images: usize = request.iter().map(ChatMessage::image_count).sum();
        assert_eq!(images, (i + 1).min(2), "request {i}");
        assert_eq!(request.last().unwrap().image_count(), 1);
    }
}

#[tokio::test]
async fn test_only_first_tool_call_is_used() {
    let phone = Arc::new(FakePhone::new());
    let mut both = reply("press_home", json!({}));
    both.tool_calls.push(tool_call("press_back", json!({})));
    let model = Arc::new(ScriptedModel::new(vec![
        both,
        reply("task_complete", json!({"summary": "home"})),
    ]));

    engine(config(10, 5), &phone, &model).run("go home").await.unwrap();

    assert_eq!(phone.calls(), vec!["key 3"]);
    let assistant = model.requests()[1]
        .iter()
        .find(|m| m.role == "assistant")
        .cloned()
        .unwrap();
    assert_eq!(assistant.tool_calls.unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_log_written() {
    let dir = tempfile::tempdir().unwrap();
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("input_text", json!({"text": "pizza"})),
        reply("task_complete", json!({"summary": "typed"})),
    ]));

    let report = engine(config(10, 5), &phone, &model)
        .with_history_dir(Some(dir.path().to_path_buf()))
        .run("search pizza")
        .await
        .unwrap();

    let path = dir.path().join(format!("session_{}.jsonl", report.session_id));
    let entries = SessionHistory::load(&path).unwrap();
    let kinds: Vec<&str> = entries.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["objective", "turn", "turn", "session_end"]);
    assert_eq!(entries[1].action.as_ref().unwrap()["text"], "pizza");
    assert_eq!(entries[3].outcome.as_ref().unwrap()["outcome"], "completed");
}

#[tokio::test]
async fn test_provider_failure_aborts_session() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::failing_at(
        2,
        vec![reply("tap", json!({"cell": "A1"}))],
    ));

    let result = engine(config(10, 5), &phone, &model).run("open the drawer").await;

    match result {
        Err(DroidClawError::LlmProvider(msg)) => assert!(msg.contains("upstream timeout")),
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(phone.calls(), vec!["tap 20 20"]);
    assert_eq!(model.requests().len(), 2);
}

#[tokio::test]
async fn test_ui_elements_reach_the_model() {
    let xml = r#"<hierarchy><node text="Wi-Fi" class="android.widget.Switch" clickable="true" bounds="[0,0][40,40]" /></hierarchy>"#;
    let phone = Arc::new(FakePhone::with_ui(xml));
    let model = Arc::new(ScriptedModel::new(vec![reply(
        "task_complete",
        json!({"summary": "seen"}),
    )]));
    let mut cfg = AppConfig::clone(&config(10, 5));
    cfg.agent.include_ui_elements = true;

    engine(Arc::new(cfg), &phone, &model).run("look").await.unwrap();

    let texts = observation_texts(&model.requests()[0]);
    let observed = texts.last().unwrap();
    assert!(observed.contains("Interactive elements:"), "{observed}");
    assert!(observed.contains(r#""Wi-Fi" position="A1""#), "{observed}");
}

#[tokio::test]
async fn test_failed_ui_dump_does_not_stop_the_loop() {
    let phone = Arc::new(FakePhone::new());
    let model = Arc::new(ScriptedModel::new(vec![
        reply("press_home", json!({})),
        reply("task_complete", json!({"summary": "home"})),
    ]));
    let mut cfg = AppConfig::clone(&config(10, 5));
    cfg.agent.include_ui_elements = true;

    let report = engine(Arc::new(cfg), &phone, &model).run("go home").await.unwrap();

    assert!(matches!(report.outcome, SessionOutcome::Completed { .. }));
    assert_eq!(phone.calls(), vec!["key 3"]);
    for request in model.requests() {
        let texts = observation_texts(&request);
        assert!(!texts.last().unwrap().contains("Interactive elements:"));
    }
}

#[tokio::test]
async fn test_undecodable_screen_capture_is_device_unavailable() {
    let phone = Arc::new(FakePhone::garbled());
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let err = engine(config(10, 5), &phone, &model).run("anything").await.unwrap_err();

    match err {
        DroidClawError::DeviceUnavailable(msg) => assert!(msg.contains("not an image"), "{msg}"),
        other => panic!("expected DeviceUnavailable, got {other:?}"),
    }
    assert!(model.requests().is_empty());
}
