//! OpenAI-compatible model endpoint.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any other server that
//! exposes `/chat/completions` with SSE streaming and function calling.
//!
//! Text deltas are forwarded as soon as they arrive. Tool-call deltas are
//! accumulated by index and emitted once the stream completes.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use keilpilot_config::AppConfig;
use keilpilot_core::error::ProviderError;
use keilpilot_core::message::{Message, MessagePart, Role, ToolCall};
use keilpilot_core::provider::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatEndpoint {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatEndpoint {
    /// Create a new endpoint. Without an API key every request fails with
    /// [`ProviderError::NotConfigured`].
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature: 0.2,
            client,
        })
    }

    /// Build the endpoint described by the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(
            "openai-compat",
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
        )?
        .with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &ModelRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": to_api_messages(&request.messages),
            "temperature": self.temperature,
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!(match request.tool_mode {
                ToolMode::Auto => "auto",
                ToolMode::Required => "required",
            });
        }

        body
    }
}

/// Convert the transcript to OpenAI wire messages.
///
/// Tool results become `tool` messages. Any user text that arrives while an
/// assistant's tool calls are still unanswered is held back until every call
/// has its `tool` message, since the API rejects anything in between.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut unanswered: HashSet<String> = HashSet::new();
    let mut deferred: Vec<ApiMessage> = Vec::new();

    for message in messages {
        let text = message.text();

        match message.role {
            Role::System => out.push(ApiMessage::text("system", text)),
            Role::Assistant => {
                out.append(&mut deferred);
                unanswered.clear();

                let calls: Vec<ApiToolCall> = message
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        MessagePart::ToolCall(call) => Some(ApiToolCall::from(call)),
                        _ => None,
                    })
                    .collect();
                unanswered.extend(calls.iter().map(|c| c.id.clone()));

                out.push(ApiMessage {
                    role: "assistant".into(),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if calls.is_empty() { None } else { Some(calls) },
                    tool_call_id: None,
                });
            }
            Role::User => {
                for part in &message.parts {
                    if let MessagePart::ToolResult { call_id, content } = part {
                        unanswered.remove(call_id);
                        out.push(ApiMessage {
                            role: "tool".into(),
                            content: Some(content.join("\n")),
                            tool_calls: None,
                            tool_call_id: Some(call_id.clone()),
                        });
                    }
                }

                if !text.is_empty() {
                    let msg = ApiMessage::text("user", text);
                    if unanswered.is_empty() {
                        out.append(&mut deferred);
                        out.push(msg);
                    } else {
                        deferred.push(msg);
                    }
                }
            }
        }

        if unanswered.is_empty() {
            out.append(&mut deferred);
        }
    }

    out.append(&mut deferred);
    out
}

/// Convert tool definitions to OpenAI API format.
fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

#[async_trait]
impl ModelEndpoint for OpenAiCompatEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ResponseStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("no API key configured".into()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            endpoint = %self.name,
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            tool_mode = ?request.tool_mode,
            "Sending streaming request"
        );

        let pending = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = pending => result.map_err(|e| ProviderError::Network(e.to_string()))?,
        };

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Endpoint streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let endpoint_name = self.name.clone();

        // Read the SSE byte stream and forward parsed parts
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(endpoint = %endpoint_name, "Stream cancelled");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let bytes = match next {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => break,
                };

                for part in decoder.push(&bytes) {
                    if tx.send(Ok(part)).await.is_err() {
                        return; // receiver dropped
                    }
                }

                if decoder.is_done() {
                    break;
                }
            }

            for part in decoder.finish() {
                if tx.send(Ok(part)).await.is_err() {
                    return;
                }
            }
            trace!(endpoint = %endpoint_name, "Stream complete");
        });

        Ok(rx)
    }
}

/// Incremental parser for the `data: {...}` lines of a completions stream.
#[derive(Default)]
struct SseDecoder {
    /// Raw bytes of the unfinished line; may end inside a UTF-8 sequence
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw text; returns the text parts completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<ResponsePart> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                self.done = true;
                break;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    for choice in stream_resp.choices {
                        if let Some(tc_deltas) = choice.delta.tool_calls {
                            for tc_delta in tc_deltas {
                                self.accumulate(tc_delta);
                            }
                        }
                        if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
                            parts.push(ResponsePart::Text { text });
                        }
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        parts
    }

    fn accumulate(&mut self, delta: StreamToolCallDelta) {
        let acc = self.tool_calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
            acc.id = id;
        }
        if let Some(func) = delta.function {
            if let Some(name) = func.name {
                acc.name = name;
            }
            if let Some(args) = func.arguments {
                acc.arguments.push_str(&args);
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Drain the accumulated tool calls, in index order.
    fn finish(&mut self) -> Vec<ResponsePart> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|acc| ResponsePart::ToolCall(acc.into_tool_call()))
            .collect()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.into(),
            content: Some(text),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

impl From<&ToolCall> for ApiToolCall {
    fn from(call: &ToolCall) -> Self {
        let arguments = match &call.input {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        Self {
            id: call.call_id.clone(),
            r#type: "function".into(),
            function: ApiFunction {
                name: call.tool_name.clone(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Arguments that are not valid JSON are passed through as a string so
    /// the dispatcher can report them as invalid input.
    fn into_tool_call(self) -> ToolCall {
        let input = if self.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.arguments)
                .unwrap_or(serde_json::Value::String(self.arguments))
        };
        ToolCall {
            call_id: self.id,
            tool_name: self.name,
            input,
        }
    }
}
