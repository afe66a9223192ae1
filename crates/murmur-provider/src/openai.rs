//! OpenAI-compatible chat completions backend.
//!
//! Covers the OpenAI API itself and the local servers that speak its wire
//! format (LM Studio, Ollama, llama.cpp, vLLM). Streaming sends `data:`
//! lines whose JSON payloads carry `choices[].delta` objects and terminates
//! with a `data: [DONE]` sentinel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::backend::{ChatBackend, TokenSink};
use crate::error::{ProviderError, Result, from_reqwest, from_status};
use crate::types::{
    ChatRequest, Completion, CompletionContent, Message, Role, ToolCall, ToolSchema, Usage,
};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Provider id reported by this backend (e.g. `"openai"`, `"ollama"`).
    pub provider_id: String,
    /// API key. May be empty for local servers.
    pub api_key: String,
    /// Base URL, e.g. `https://api.openai.com/v1` or `http://localhost:11434/v1`.
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Create a configuration for the given endpoint.
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// A [`ChatBackend`] speaking the OpenAI chat completions wire format.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: Arc<OpenAiConfig>,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Connection {
                provider: config.provider_id.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    fn provider(&self) -> &str {
        &self.config.provider_id
    }

    /// Build the JSON body for the chat completions endpoint.
    fn build_request_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(to_wire_message).collect();

        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "messages": messages,
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = build_tools_payload(&request.tools);
        }
        if stream {
            body["stream"] = json!(true);
            // Ask for usage in the final stream chunk where supported.
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    /// Send the HTTP request to the chat completions endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.config.api_key.is_empty() {
            let value = format!("Bearer {}", self.config.api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| ProviderError::InvalidRequest {
                    provider: self.provider().to_owned(),
                    reason: format!("invalid API key header: {e}"),
                })?,
            );
        }

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| from_reqwest(self.provider(), e))
    }

    /// Parse a non-streaming chat completions response.
    fn parse_response(&self, v: &Value) -> Result<Completion> {
        let message = &v["choices"][0]["message"];
        if message.is_null() {
            return Err(ProviderError::ParseFailed {
                reason: "missing `choices[0].message` in response".into(),
            });
        }

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for tc in calls {
                let arguments_raw = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(arguments_raw).map_err(|e| ProviderError::ParseFailed {
                        reason: format!("invalid JSON in tool call arguments: {e}"),
                    })?;
                tool_calls.push(ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name: tc["function"]["name"].as_str().unwrap_or_default().to_owned(),
                    arguments,
                });
            }
        }

        let usage = Usage {
            prompt_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        let content = if tool_calls.is_empty() {
            CompletionContent::Text(message["content"].as_str().unwrap_or_default().to_owned())
        } else {
            CompletionContent::ToolCalls(tool_calls)
        };

        Ok(Completion {
            content,
            usage,
            provider: self.provider().to_owned(),
            model: v["model"].as_str().unwrap_or_default().to_owned(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn id(&self) -> &str {
        self.provider()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
        let body = self.build_request_body(request, false);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Connection {
            provider: self.provider().to_owned(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(from_status(self.provider(), status.as_u16(), text));
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
            return Err(from_status(self.provider(), status.as_u16(), text));
        }

        let mut accumulator = OpenAiStreamAccumulator::new();
        let mut byte_stream = resp.bytes_stream();
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| ProviderError::StreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let text = std::str::from_utf8(&chunk).map_err(|e| ProviderError::StreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;

            line_buffer.push_str(text);

            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer = line_buffer[newline_pos + 1..].to_owned();

                if let Some(delta) = accumulator.feed_line(&line)? {
                    on_token(&delta);
                }
                if accumulator.is_done() {
                    return accumulator.into_completion(self.provider(), &self.config.default_model);
                }
            }
        }

        accumulator.into_completion(self.provider(), &self.config.default_model)
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Convert a provider-agnostic message to the chat completions shape.
fn to_wire_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({"role": "system", "content": msg.content}),
        Role::User => json!({"role": "user", "content": msg.content}),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                json!({"role": "assistant", "content": msg.content})
            } else {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                json!({"role": "assistant", "content": msg.content, "tool_calls": calls})
            }
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
    }
}

/// Convert tool schemas into the `function` tool format.
fn build_tools_payload(tools: &[ToolSchema]) -> Value {
    let tool_values: Vec<Value> = tools
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
    json!(tool_values)
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates fragments from an OpenAI SSE stream into a complete response.
///
/// Text deltas are simple concatenation. Tool call deltas arrive indexed:
/// the id and function name typically land in the first chunk, with argument
/// fragments following.
#[derive(Debug, Default)]
struct OpenAiStreamAccumulator {
    text: String,
    tool_call_builders: Vec<OpenAiToolCallBuilder>,
    done: bool,
    model: String,
    usage: Usage,
}

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been received.
    fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a single SSE line.
    ///
    /// Returns `Ok(Some(text_delta))` when a text content delta is present,
    /// `Ok(None)` for non-text events.
    fn feed_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data: ") else {
            // Could be an `event:` line or other SSE field; ignore.
            return Ok(None);
        };

        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| ProviderError::ParseFailed {
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        if let Some(model) = v["model"].as_str() {
            self.model = model.to_owned();
        }

        // Usage arrives in the final chunk before `[DONE]` where supported.
        if let Some(usage_obj) = v.get("usage").filter(|u| !u.is_null()) {
            if let Some(prompt) = usage_obj["prompt_tokens"].as_u64() {
                self.usage.prompt_tokens = prompt as u32;
            }
            if let Some(completion) = usage_obj["completion_tokens"].as_u64() {
                self.usage.completion_tokens = completion as u32;
            }
        }

        let delta = &v["choices"][0]["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        let mut text_delta: Option<String> = None;
        if let Some(content) = delta["content"].as_str() {
            self.text.push_str(content);
            text_delta = Some(content.to_owned());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;

                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders.push(OpenAiToolCallBuilder::default());
                }

                let builder = &mut self.tool_call_builders[index];
                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }

                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(text_delta)
    }

    /// Consume the accumulator into a final [`Completion`].
    fn into_completion(self, provider: &str, default_model: &str) -> Result<Completion> {
        let model = if self.model.is_empty() {
            default_model.to_owned()
        } else {
            self.model.clone()
        };

        let content = if self.tool_call_builders.is_empty() {
            CompletionContent::Text(self.text)
        } else {
            let calls: Result<Vec<ToolCall>> = self
                .tool_call_builders
                .into_iter()
                .map(|b| {
                    let arguments: Value = if b.arguments.is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&b.arguments).map_err(|e| {
                            ProviderError::ParseFailed {
                                reason: format!(
                                    "invalid JSON in tool call `{}` arguments: {e}",
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
            provider: provider.to_owned(),
            model,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_accumulation() {
        let mut acc = OpenAiStreamAccumulator::new();

        let delta1 = acc
            .feed_line(
                r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
            )
            .unwrap();
        assert_eq!(delta1, Some("Hello".to_owned()));

        let delta2 = acc
            .feed_line(
                r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":" world"}}]}"#,
            )
            .unwrap();
        assert_eq!(delta2, Some(" world".to_owned()));

        let completion = acc.into_completion("openai", "gpt-test").unwrap();
        match completion.content {
            CompletionContent::Text(t) => assert_eq!(t, "Hello world"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_sets_flag() {
        let mut acc = OpenAiStreamAccumulator::new();
        assert!(!acc.is_done());

        let result = acc.feed_line("data: [DONE]").unwrap();
        assert!(result.is_none());
        assert!(acc.is_done());
    }

    #[test]
    fn tool_call_accumulation_across_chunks() {
        let mut acc = OpenAiStreamAccumulator::new();

        acc.feed_line(
            r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"file_read","arguments":""}}]}}]}"#,
        )
        .unwrap();
        acc.feed_line(
            r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
        )
        .unwrap();
        acc.feed_line(
            r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
        )
        .unwrap();
        acc.feed_line("data: [DONE]").unwrap();

        let completion = acc.into_completion("openai", "gpt-test").unwrap();
        match completion.content {
            CompletionContent::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_abc");
                assert_eq!(calls[0].name, "file_read");
                assert_eq!(calls[0].arguments["path"], "a.txt");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[test]
    fn usage_from_final_chunk() {
        let mut acc = OpenAiStreamAccumulator::new();
        acc.feed_line(
            r#"data: {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"hi"}}]}"#,
        )
        .unwrap();
        acc.feed_line(
            r#"data: {"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":3}}"#,
        )
        .unwrap();
        acc.feed_line("data: [DONE]").unwrap();

        let completion = acc.into_completion("openai", "gpt-test").unwrap();
        assert_eq!(completion.usage.prompt_tokens, 9);
        assert_eq!(completion.usage.completion_tokens, 3);
    }

    #[test]
    fn wire_message_for_tool_result() {
        let msg = Message::tool_result("call_1", "42 files");
        let wire = to_wire_message(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
        assert_eq!(wire["content"], "42 files");
    }

    #[test]
    fn non_streaming_parse_extracts_tool_calls() {
        let backend = OpenAiBackend::new(OpenAiConfig::new(
            "openai",
            "https://api.openai.com/v1",
            "key",
            "gpt-test",
        ))
        .unwrap();

        let v = serde_json::json!({
            "model": "gpt-test",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "shell_execute", "arguments": "{\"command\":\"ls\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        });

        let completion = backend.parse_response(&v).unwrap();
        match completion.content {
            CompletionContent::ToolCalls(calls) => {
                assert_eq!(calls[0].name, "shell_execute");
                assert_eq!(calls[0].arguments["command"], "ls");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
        assert_eq!(completion.usage.prompt_tokens, 5);
    }
}
