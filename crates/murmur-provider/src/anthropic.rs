//! Anthropic Messages API backend.
//!
//! Supports streaming SSE and non-streaming modes, tool use and system
//! prompts. The system message is lifted out of the message array (the
//! Messages API expects it as a top-level field) and tool results travel as
//! user messages with `tool_result` content blocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::backend::{ChatBackend, TokenSink};
use crate::error::{ProviderError, Result, from_reqwest, from_status};
use crate::streaming::SseParser;
use crate::types::{
    ChatRequest, Completion, CompletionContent, Message, Role, StreamDelta, StreamEvent, ToolCall,
    ToolSchema, Usage,
};

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider id reported by this backend.
const PROVIDER_ID: &str = "anthropic";

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Connection settings for the Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// Request timeout.
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Create a configuration with standard defaults for the given key/model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A [`ChatBackend`] speaking the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    config: Arc<AnthropicConfig>,
    http: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey {
                provider: PROVIDER_ID.into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Connection {
                provider: PROVIDER_ID.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    // -----------------------------------------------------------------------
    // Internal: request building
    // -----------------------------------------------------------------------

    /// Build the JSON body for the Messages API.
    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let (system_text, messages) = split_system_message(&request.messages);

        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
        });

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = build_tools_payload(&request.tools);
        }

        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Send the HTTP request to the Messages API endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                ProviderError::InvalidRequest {
                    provider: PROVIDER_ID.into(),
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| from_reqwest(PROVIDER_ID, e))
    }

    /// Parse a non-streaming Messages API response.
    fn parse_response(&self, v: &Value) -> Result<Completion> {
        let content = v["content"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseFailed {
                reason: "missing `content` array in response".into(),
            })?;

        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for block in content {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t.to_owned());
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_owned(),
                        name: block["name"].as_str().unwrap_or_default().to_owned(),
                        arguments: block["input"].clone(),
                    });
                }
                _ => {}
            }
        }

        let usage = Usage {
            prompt_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        };

        let content = if tool_calls.is_empty() {
            CompletionContent::Text(text_parts.join(""))
        } else {
            CompletionContent::ToolCalls(tool_calls)
        };

        Ok(Completion {
            content,
            usage,
            provider: PROVIDER_ID.into(),
            model: v["model"].as_str().unwrap_or_default().to_owned(),
        })
    }

    /// Consume an SSE stream into a final [`Completion`].
    async fn consume_stream(
        &self,
        resp: reqwest::Response,
        on_token: TokenSink<'_>,
    ) -> Result<Completion> {
        let mut parser = SseParser::new();
        let mut accumulator = StreamAccumulator::default();

        let mut byte_stream = resp.bytes_stream();

        // Buffer for partial lines that span chunk boundaries.
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| ProviderError::StreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let text = std::str::from_utf8(&chunk).map_err(|e| ProviderError::StreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;

            line_buffer.push_str(text);

            // Process complete lines. SSE lines are delimited by `\n`.
            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer = line_buffer[newline_pos + 1..].to_owned();

                if let Some(event) = parser.parse_line(&line)? {
                    accumulator.apply(&event, &mut *on_token);

                    if matches!(event, StreamEvent::MessageStop) {
                        return accumulator.into_completion();
                    }
                }
            }
        }

        // Stream ended without a MessageStop; return what we have.
        accumulator.into_completion()
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        let body = self.build_request_body(request, false);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Connection {
            provider: PROVIDER_ID.into(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(from_status(PROVIDER_ID, status.as_u16(), text));
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| ProviderError::ParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        self.parse_response(&v)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_token: TokenSink<'_>,
    ) -> Result<Completion> {
        let body = self.build_request_body(request, true);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(from_status(PROVIDER_ID, status.as_u16(), text));
        }

        self.consume_stream(resp, on_token).await
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Convert tool schemas into the Messages API format.
fn build_tools_payload(tools: &[ToolSchema]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect();
    json!(tool_values)
}

/// Split the system message out and convert the rest to the wire format.
fn split_system_message(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                // Only a single system block is supported; concatenate if
                // multiple system messages exist.
                match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&msg.content);
                    }
                    None => {
                        system = Some(msg.content.clone());
                    }
                }
            }
            Role::User => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": msg.content,
                }));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": msg.content,
                    }));
                } else {
                    // Assistant message with tool_use content blocks.
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({
                            "type": "text",
                            "text": msg.content,
                        }));
                    }
                    for tc in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": content,
                    }));
                }
            }
            Role::Tool => {
                // Tool results travel as user messages with `tool_result`
                // content blocks.
                wire_messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id,
                        "content": msg.content,
                    }],
                }));
            }
        }
    }

    (system, wire_messages)
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates fragments from streaming events into a complete response.
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tool_calls: Vec<ToolCallBuilder>,
    stop_reason: Option<String>,
    model: String,
    usage: Usage,
}

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug)]
struct ToolCallBuilder {
    id: String,
    name: String,
    /// Accumulated JSON input string.
    input_json: String,
}

impl StreamAccumulator {
    /// Apply a single stream event to the accumulator.
    fn apply(&mut self, event: &StreamEvent, on_token: TokenSink<'_>) {
        match event {
            StreamEvent::MessageStart {
                model,
                prompt_tokens,
                ..
            } => {
                self.model = model.clone();
                self.usage.prompt_tokens = *prompt_tokens;
            }

            StreamEvent::ContentBlockStart {
                content_type,
                id,
                name,
                ..
            } => {
                if content_type == "tool_use" {
                    self.tool_calls.push(ToolCallBuilder {
                        id: id.clone().unwrap_or_default(),
                        name: name.clone().unwrap_or_default(),
                        input_json: String::new(),
                    });
                }
            }

            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                StreamDelta::TextDelta(t) => {
                    self.text.push_str(t);
                    on_token(t);
                }
                StreamDelta::InputJsonDelta(j) => {
                    if let Some(builder) = self.tool_calls.last_mut() {
                        builder.input_json.push_str(j);
                    }
                }
            },

            StreamEvent::MessageDelta {
                stop_reason,
                completion_tokens,
            } => {
                self.stop_reason = stop_reason.clone();
                self.usage.completion_tokens = *completion_tokens;
            }

            // Other events don't affect the accumulator.
            _ => {}
        }
    }

    /// Convert the accumulated state into a final [`Completion`].
    fn into_completion(self) -> Result<Completion> {
        let content = if self.tool_calls.is_empty() {
            CompletionContent::Text(self.text)
        } else {
            let calls: Result<Vec<ToolCall>> = self
                .tool_calls
                .into_iter()
                .map(|b| {
                    let arguments: Value = if b.input_json.is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&b.input_json).map_err(|e| {
                            ProviderError::ParseFailed {
                                reason: format!(
                                    "invalid JSON in tool call `{}` input: {e}",
                                    b.name
                                ),
                            }
                        })?
                    };

                    Ok(ToolCall {
                        id: b.id,
                        name: b.name,
                        arguments,
                    })
                })
                .collect();

            CompletionContent::ToolCalls(calls?)
        };

        Ok(Completion {
            content,
            usage: self.usage,
            provider: PROVIDER_ID.into(),
            model: self.model,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
