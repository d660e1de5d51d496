use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::errors::AppError;

/// One entry in the orchestrator's working context for a single exchange.
/// Creation order is preserved so every oracle call sees a stable,
/// reproducible history.
#[derive(Debug, Clone)]
pub enum Turn {
    User(String),
    Assistant(String),
    /// The oracle's tool-call requests from one step, in request order.
    ToolCalls(Vec<ToolCallRequest>),
    /// The executed result for one of those calls.
    ToolResult {
        call_id: String,
        tool: String,
        content: Value,
    },
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Schema advertised to the oracle for one tool.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub struct OracleRequest<'a> {
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDefinition],
}

/// What one oracle step produced: either tool-call requests to execute and
/// feed back, or the final answer (whose deltas were already streamed).
#[derive(Debug)]
pub enum StepOutcome {
    ToolCalls(Vec<ToolCallRequest>),
    Final(String),
}

/// Tool-calling text-generation oracle, consumed as a black box. Incremental
/// text is forwarded through `deltas` as it is produced; a closed delta
/// channel means the caller went away and surfaces as `AppError::Cancelled`.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn step(
        &self,
        request: OracleRequest<'_>,
        deltas: mpsc::Sender<String>,
    ) -> Result<StepOutcome, AppError>;
}

// ── OpenAI-compatible client ─────────────────────────────────────────────────

const MAX_CONNECT_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct OpenAiOracle {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn build_messages(&self, request: &OracleRequest<'_>) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        for turn in request.turns {
            match turn {
                Turn::User(content) => {
                    messages.push(json!({ "role": "user", "content": content }));
                }
                Turn::Assistant(content) => {
                    messages.push(json!({ "role": "assistant", "content": content }));
                }
                Turn::ToolCalls(calls) => {
                    let tool_calls: Vec<Value> = calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    messages.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": tool_calls,
                    }));
                }
                Turn::ToolResult { call_id, content, .. } => {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": content.to_string(),
                    }));
                }
            }
        }
        messages
    }

    fn build_body(&self, request: &OracleRequest<'_>) -> Value {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();

        json!({
            "model": self.model,
            "messages": self.build_messages(request),
            "tools": tools,
            "tool_choice": "auto",
            "temperature": 1,
            "stream": true,
        })
    }

    /// Opens the streaming completion request, retrying transient failures
    /// before the first byte only — an established stream is never retried.
    async fn open_stream(&self, body: &Value) -> Result<reqwest::Response, AppError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < MAX_CONNECT_RETRIES {
                        attempt += 1;
                        warn!("oracle returned {status}, retry {attempt}/{MAX_CONNECT_RETRIES}");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    error!("oracle request failed ({status}): {text}");
                    return Err(AppError::OracleError {
                        message: format!("oracle returned {status}"),
                    });
                }
                Err(e) if e.is_connect() => {
                    error!("oracle unreachable: {e}");
                    return Err(AppError::OracleUnavailable { host: self.base_url.clone() });
                }
                Err(e) => {
                    error!("oracle request error: {e}");
                    return Err(AppError::OracleError { message: e.to_string() });
                }
            }
        }
    }
}

/// Accumulates streamed tool-call fragments keyed by their chunk index.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: Vec<(String, String, String)>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, fragment: &Value) {
        let index = fragment
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(self.calls.len() as u64) as usize;
        while self.calls.len() <= index {
            self.calls.push((String::new(), String::new(), String::new()));
        }
        let slot = &mut self.calls[index];
        if let Some(id) = fragment.get("id").and_then(Value::as_str) {
            slot.0.push_str(id);
        }
        if let Some(function) = fragment.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                slot.1.push_str(name);
            }
            if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                slot.2.push_str(args);
            }
        }
    }

    fn finish(self) -> Vec<ToolCallRequest> {
        self.calls
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, raw_args)| {
                // Malformed argument JSON is handed through as Null; the tool
                // registry turns it into a validation failure, not a crash.
                let arguments = if raw_args.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&raw_args).unwrap_or_else(|e| {
                        warn!(tool = name, "unparseable tool arguments: {e}");
                        Value::Null
                    })
                };
                ToolCallRequest { id, name, arguments }
            })
            .collect()
    }
}

#[async_trait]
impl CompletionOracle for OpenAiOracle {
    async fn step(
        &self,
        request: OracleRequest<'_>,
        deltas: mpsc::Sender<String>,
    ) -> Result<StepOutcome, AppError> {
        let body = self.build_body(&request);
        let response = self.open_stream(&body).await?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();
        let mut tool_calls = ToolCallAccumulator::default();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| AppError::OracleError {
                message: format!("stream read failed: {e}"),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Server-sent events: frames are separated by a blank line.
            while let Some(frame_end) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..frame_end + 2).collect();
                for line in frame.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let event: Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("skipping malformed oracle chunk: {e}");
                            continue;
                        }
                    };
                    let delta = &event["choices"][0]["delta"];
                    if let Some(content) = delta.get("content").and_then(Value::as_str) {
                        if !content.is_empty() {
                            text.push_str(content);
                            if deltas.send(content.to_string()).await.is_err() {
                                // Receiver dropped: the client disconnected.
                                debug!("delta channel closed, abandoning oracle stream");
                                return Err(AppError::Cancelled);
                            }
                        }
                    }
                    if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
                        for fragment in fragments {
                            tool_calls.absorb(fragment);
                        }
                    }
                }
            }
        }

        let calls = tool_calls.finish();
        if calls.is_empty() {
            Ok(StepOutcome::Final(text))
        } else {
            Ok(StepOutcome::ToolCalls(calls))
        }
    }
}
