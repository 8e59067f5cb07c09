use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;

use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, FunctionCall, LlmResponse, StreamChunkKind, ToolCall, ToolDef,
};

/// Base delay for the first rate-limit retry; doubles per attempt.
const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on any single rate-limit wait, hinted or not.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

static RETRY_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"try again in ([0-9]+(?:\.[0-9]+)?)s").unwrap_or_else(|e| panic!("retry hint regex: {e}"))
});

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, max_retries: u32) -> Self {
        Self {
            id,
            api_base,
            api_key,
            max_retries,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
    ) -> DroidClawResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::debug!(body = %sanitized_for_log(&body), "request body (base64 omitted)");

        let mut attempt = 0u32;
        let response = loop {
            let response = self
                .client
                .post(&self.api_base)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                let err_body = response.text().await.unwrap_or_default();
                let delay = retry_delay(attempt, &err_body);
                tracing::warn!(
                    provider = %self.id,
                    attempt = attempt + 1,
                    max = self.max_retries,
                    delay_s = delay.as_secs_f64(),
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let err_body = response.text().await.unwrap_or_default();
                return Err(DroidClawError::LlmProvider(format!("{status}: {err_body}")));
            }
            break response;
        };

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Consume an SSE response, accumulating content and tool-call deltas.
    async fn handle_stream(&self, response: reqwest::Response) -> DroidClawResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut line_buf: Vec<u8> = Vec::new();

        let mut resp = LlmResponse::default();
        let mut tc_builders: BTreeMap<usize, ToolCallBuilder> = BTreeMap::new();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for &b in bytes.iter() {
                if b != b'\n' {
                    line_buf.push(b);
                    continue;
                }
                let line = String::from_utf8_lossy(&line_buf).trim().to_string();
                line_buf.clear();
                if line.is_empty() {
                    continue;
                }

                let chunks = match sse_parser::parse_sse_line(&line) {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                        continue;
                    }
                };
                for chunk in chunks {
                    match chunk.kind {
                        StreamChunkKind::Reasoning => resp.reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => resp.content.push_str(&chunk.content),
                        StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut tc_builders),
                        StreamChunkKind::Error => {
                            return Err(DroidClawError::LlmProvider(chunk.content));
                        }
                        StreamChunkKind::Done => break 'stream,
                    }
                }
            }
        }

        resp.tool_calls = build_tool_calls(tc_builders);

        tracing::info!(
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            tool_calls = resp.tool_calls.len(),
            tools = ?resp.tool_calls.iter().map(|tc| tc.function.name.as_str()).collect::<Vec<_>>(),
            "LLM stream complete"
        );

        Ok(resp)
    }

    /// Handle a non-streaming JSON response.
    async fn handle_json(&self, response: reqwest::Response) -> DroidClawResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let resp = parse_completion_json(&json)?;

        tracing::info!(
            content_len = resp.content.len(),
            tool_calls = resp.tool_calls.len(),
            "LLM JSON response received"
        );

        Ok(resp)
    }
}

/// Extract text, reasoning and tool calls from a chat-completions JSON body.
pub fn parse_completion_json(json: &serde_json::Value) -> DroidClawResult<LlmResponse> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(DroidClawError::LlmProvider(message.to_string()));
    }
    let message = &json["choices"][0]["message"];
    if message.is_null() {
        return Err(DroidClawError::LlmProvider("response has no choices[0].message".into()));
    }

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                })
                .filter(|tc| !tc.function.name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content: message["content"].as_str().unwrap_or("").to_string(),
        reasoning: message["reasoning_content"].as_str().unwrap_or("").to_string(),
        tool_calls,
    })
}

/// Delay before retry number `attempt` (0-based). A "try again in Ns" hint
/// from the provider wins over exponential backoff. Never exceeds
/// [`MAX_RETRY_DELAY`].
pub fn retry_delay(attempt: u32, err_body: &str) -> Duration {
    let hinted = RETRY_HINT_RE
        .captures(err_body)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|secs| Duration::try_from_secs_f64(secs + 1.0).unwrap_or(MAX_RETRY_DELAY));
    let delay = hinted
        .unwrap_or_else(|| RATE_LIMIT_BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt)));
    delay.min(MAX_RETRY_DELAY)
}

/// Copy of the request body with image data URLs replaced, for logging only.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for part in msgs
            .iter_mut()
            .filter_map(|msg| msg.get_mut("content").and_then(|c| c.as_array_mut()))
            .flatten()
        {
            if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                *url = serde_json::Value::String("<omitted_base64_image>".to_string());
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    call_type: String,
    name: String,
    arguments: String,
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(chunk_content: &str, builders: &mut BTreeMap<usize, ToolCallBuilder>) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.id = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.call_type = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.name.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.arguments.push_str(args);
        }
    }
}

/// Convert accumulated builders into typed `ToolCall`s, dropping nameless ones.
fn build_tool_calls(builders: BTreeMap<usize, ToolCallBuilder>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|b| !b.name.is_empty())
        .map(|b| ToolCall {
            id: b.id,
            call_type: if b.call_type.is_empty() { "function".to_string() } else { b.call_type },
            function: FunctionCall {
                name: b.name,
                arguments: b.arguments,
            },
        })
        .collect()
}
