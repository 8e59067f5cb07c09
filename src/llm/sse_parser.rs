use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into stream chunks.
///
/// One delta may carry reasoning, content and tool-call fragments at once;
/// every kind present is returned, in that order, followed by `Done` when
/// the choice has a finish reason. Keep-alive and non-data lines yield an
/// empty list.
pub fn parse_sse_line(line: &str) -> DroidClawResult<Vec<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(Vec::new());
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(Vec::new());
    };

    if data == "[DONE]" {
        return Ok(vec![chunk(StreamChunkKind::Done, String::new())]);
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| DroidClawError::SseParsing(e.to_string()))?;

    if let Some(message) = json["error"]["message"].as_str() {
        return Ok(vec![chunk(StreamChunkKind::Error, message.to_string())]);
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(Vec::new());
    };
    let delta = &first["delta"];
    let mut chunks = Vec::new();

    // Some models (DeepSeek, Qwen) expose their reasoning separately.
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        chunks.push(chunk(StreamChunkKind::Reasoning, reasoning.to_string()));
    }

    if let Some(content) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        chunks.push(chunk(StreamChunkKind::Content, content.to_string()));
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array().filter(|t| !t.is_empty()) {
        let raw = serde_json::to_string(tool_calls)
            .map_err(|e| DroidClawError::SseParsing(e.to_string()))?;
        chunks.push(chunk(StreamChunkKind::ToolCall, raw));
    }

    if first["finish_reason"].as_str().is_some() {
        chunks.push(chunk(StreamChunkKind::Done, String::new()));
    }

    Ok(chunks)
}

fn chunk(kind: StreamChunkKind, content: String) -> StreamChunk {
    StreamChunk { kind, content }
}
