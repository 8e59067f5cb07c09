//! MCP server over stdio: lets an external model client drive the device
//! with the same grid, action schema and executor the agent loop uses.
//!
//! One JSON-RPC message per line on stdin, one response per line on stdout.
//! Logs go to stderr.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::agent_engine::action::Action;
use crate::agent_engine::engine::SYSTEM_PROMPT;
use crate::config::AppConfig;
use crate::errors::DroidClawResult;
use crate::executor::backend::DeviceBackend;
use crate::executor::dispatcher::Executor;
use crate::llm::tools::load_android_tools;
use crate::mcp::protocol::{
    CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, McpTool, ToolContent,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::perception::pipeline;
use crate::perception::screenshot::PNG_DATA_URL_PREFIX;
use crate::perception::som_grid::describe_grid;
use crate::perception::types::Observation;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const GET_SCREEN: &str = "get_screen";
const LIST_DEVICES: &str = "list_devices";
const SYSTEM_PROMPT_TOOL: &str = "droidclaw_system_prompt";

pub struct McpServer {
    config: Arc<AppConfig>,
    device: Arc<dyn DeviceBackend>,
    executor: Executor,
    tools: Vec<McpTool>,
    /// Grid the client last saw; cell arguments are resolved against it.
    last_observation: Mutex<Option<Observation>>,
}

impl McpServer {
    pub fn new(config: Arc<AppConfig>, device: Arc<dyn DeviceBackend>) -> DroidClawResult<Self> {
        Ok(Self {
            executor: Executor::new(device.clone(), &config.device),
            tools: mcp_tools()?,
            last_observation: Mutex::new(None),
            device,
            config,
        })
    }

    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    /// Serve until `reader` hits EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> DroidClawResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(tools = self.tools.len(), "MCP server ready on stdio");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
        }
        tracing::info!("MCP client closed the connection");
        Ok(())
    }

    /// Parse and dispatch one line. `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Some(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("parse error: {e}"))),
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "droidclaw", "version": env!("CARGO_PKG_VERSION") },
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": &self.tools })),
            "tools/call" => {
                let params = request
                    .params
                    .ok_or_else(|| "missing params".to_string())
                    .and_then(|p| serde_json::from_value::<CallToolParams>(p).map_err(|e| e.to_string()));
                match params {
                    Ok(params) => {
                        let args = params.arguments.unwrap_or_else(|| json!({}));
                        let result = self.call_tool(&params.name, &args).await;
                        match serde_json::to_value(result) {
                            Ok(value) => JsonRpcResponse::success(id, value),
                            Err(e) => JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
                        }
                    }
                    Err(e) => JsonRpcResponse::failure(id, INVALID_PARAMS, format!("tools/call: {e}")),
                }
            }
            other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
        };
        Some(response)
    }

    /// Run one tool. Failures come back as `is_error` results so the client's
    /// model can read them.
    pub async fn call_tool(&self, name: &str, args: &Value) -> CallToolResult {
        tracing::info!(tool = name, %args, "tool call");
        let result = match name {
            GET_SCREEN => self.get_screen().await,
            LIST_DEVICES => self.list_devices().await,
            SYSTEM_PROMPT_TOOL => CallToolResult::text(format!(
                "# Android Device Control System Prompt\n\n{SYSTEM_PROMPT}"
            )),
            _ => self.run_action(name, args).await,
        };
        if result.is_error {
            tracing::warn!(tool = name, "tool call failed");
        }
        result
    }

    async fn get_screen(&self) -> CallToolResult {
        let observation = match pipeline::capture(self.device.as_ref(), &self.config.grid, true).await {
            Ok(obs) => obs,
            Err(e) => return CallToolResult::error(format!("Error capturing screen: {e}")),
        };
        let Some(data) = observation.image_data_url.strip_prefix(PNG_DATA_URL_PREFIX) else {
            return CallToolResult::error("Error capturing screen: unexpected image encoding");
        };
        let text = format!(
            "Device screen {}x{}. {}\n\n## Interactive UI Elements\n\n{}\n\n\
             Use the 'position' value of an element as the cell argument.",
            observation.device_size.0,
            observation.device_size.1,
            describe_grid(observation.grid),
            observation
                .ui_elements
                .as_deref()
                .unwrap_or("(UI hierarchy unavailable)"),
        );
        let content = vec![
            ToolContent::Image {
                data: data.to_string(),
                mime_type: "image/png".into(),
            },
            ToolContent::Text { text },
        ];
        *self.last_observation.lock().await = Some(observation);
        CallToolResult {
            content,
            is_error: false,
        }
    }

    async fn list_devices(&self) -> CallToolResult {
        match self.device.list_devices().await {
            Ok(serials) if serials.is_empty() => CallToolResult::text("No Android devices connected."),
            Ok(serials) => {
                let lines: Vec<String> = serials.iter().map(|s| format!("- {s}")).collect();
                CallToolResult::text(format!("Connected devices:\n{}", lines.join("\n")))
            }
            Err(e) => CallToolResult::error(format!("Error listing devices: {e}")),
        }
    }

    async fn run_action(&self, name: &str, args: &Value) -> CallToolResult {
        let action = match Action::parse(name, args) {
            Ok(action) if action.is_terminal() => {
                return CallToolResult::error(format!("{name} is only meaningful inside the agent loop"));
            }
            Ok(action) => action,
            Err(e) => return CallToolResult::error(e.to_string()),
        };

        let observation = match self.current_observation().await {
            Ok(obs) => obs,
            Err(e) => return CallToolResult::error(format!("Error capturing screen: {e}")),
        };

        match self.executor.execute(&action, &observation).await {
            Ok(result) if result.success => CallToolResult::text(result.detail),
            Ok(result) => CallToolResult::error(result.detail),
            Err(e) => CallToolResult::error(format!("Error executing {name}: {e}")),
        }
    }

    /// Last `get_screen` grid, or a fresh capture if the client never asked.
    async fn current_observation(&self) -> DroidClawResult<Observation> {
        let mut last = self.last_observation.lock().await;
        if let Some(obs) = last.as_ref() {
            return Ok(obs.clone());
        }
        let obs = pipeline::capture(self.device.as_ref(), &self.config.grid, false).await?;
        *last = Some(obs.clone());
        Ok(obs)
    }
}

/// Device actions from the function-calling schema, minus the loop-only
/// terminal tools, plus screen capture, device listing and the system prompt.
fn mcp_tools() -> DroidClawResult<Vec<McpTool>> {
    let empty = json!({ "type": "object", "properties": {}, "required": [] });
    let mut tools = vec![McpTool {
        name: GET_SCREEN.into(),
        description: "Capture the current Android screen. Returns a screenshot with a labeled grid \
                      (columns A, B, ... left to right, rows 1, 2, ... top to bottom) and the interactive \
                      UI elements with their cell positions. Call this before acting."
            .into(),
        input_schema: empty.clone(),
    }];

    tools.extend(
        load_android_tools()?
            .into_iter()
            .filter(|t| !matches!(t.function.name.as_str(), "task_complete" | "task_impossible"))
            .map(|t| McpTool {
                name: t.function.name,
                description: t.function.description,
                input_schema: t.function.parameters,
            }),
    );

    tools.push(McpTool {
        name: LIST_DEVICES.into(),
        description: "List connected Android devices.".into(),
        input_schema: empty.clone(),
    });
    tools.push(McpTool {
        name: SYSTEM_PROMPT_TOOL.into(),
        description: "Get the recommended system prompt for controlling the device: the grid system, \
                      the available actions and how to use them."
            .into(),
        input_schema: empty,
    });
    Ok(tools)
}

/// Serve MCP on the process's stdin and stdout.
pub async fn serve_stdio(server: &McpServer) -> DroidClawResult<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    server.serve(stdin, tokio::io::stdout()).await
}
