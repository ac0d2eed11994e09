//! A concrete OpenAI-compatible SSE [`Provider`] implementation.
//!
//! Reuses the streaming/retry plumbing the client used to drive directly:
//! [`crate::retry`] for request-open resilience, and an SSE line parser
//! adapted from the same source. Unlike the old client, this provider
//! translates deltas into [`StreamEvent`]s as they arrive rather than
//! buffering until `finish_reason` — it emits `ToolUse{id,name}` as soon as
//! both are known, then streams the argument JSON fragments as `TextDelta`
//! events per the Provider trait's tool-input-accumulation contract.

use super::{BoxStream, CancellationToken, CompletionRequest, Provider, StreamEvent};
use crate::retry::{retry_with_backoff_conditional, RetryConfig};
use crate::types::{ContentBlock, MessageRole};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

// ============================================================================
// WIRE DTOS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded arguments — the wire quirk this boundary owns.
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunctionSchema,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunctionSchema {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChunk {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIToolCallDelta {
    index: u32,
    id: Option<String>,
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

fn message_to_wire(message: &crate::types::Message) -> OpenAIMessage {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };

    // A message carrying a bare tool_result is translated to the wire's
    // "tool" role; everything else collapses its text blocks.
    if let Some(result) = message.content.first().and_then(|b| b.as_tool_result()) {
        if message.is_bare_tool_result() {
            return OpenAIMessage {
                role: "tool".to_string(),
                content: result.text.clone(),
                tool_calls: None,
                tool_call_id: Some(result.tool_use_id.clone()),
            };
        }
    }

    let content = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tool_calls: Vec<OpenAIToolCall> = message
        .content
        .iter()
        .filter_map(|block| block.as_tool_use())
        .map(|tool_use| OpenAIToolCall {
            id: tool_use.id.clone(),
            call_type: "function".to_string(),
            function: OpenAIFunctionCall {
                name: tool_use.name.clone(),
                arguments: tool_use.input.to_string(),
            },
        })
        .collect();

    OpenAIMessage {
        role: role.to_string(),
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn request_to_wire(request: &CompletionRequest) -> OpenAIRequest {
    let mut messages = Vec::new();
    if !request.system.is_empty() {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: request.system.clone(),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    messages.extend(request.messages.iter().map(message_to_wire));

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunctionSchema {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    };

    OpenAIRequest {
        model: request.model.clone(),
        messages,
        stream: true,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
    }
}

// ============================================================================
// SSE PARSING
// ============================================================================

fn parse_sse_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>> {
    let byte_stream = response.bytes_stream();

    let chunk_stream = byte_stream
        .map(|result| result.map_err(Error::Http))
        .flat_map(|result| match result {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                let lines: Vec<Result<OpenAIChunk>> = text
                    .lines()
                    .filter_map(|line| {
                        let data = line.strip_prefix("data: ")?;
                        if data == "[DONE]" {
                            return None;
                        }
                        Some(
                            serde_json::from_str::<OpenAIChunk>(data)
                                .map_err(|e| Error::stream(format!("invalid SSE chunk: {e}"))),
                        )
                    })
                    .collect();
                futures::stream::iter(lines)
            }
            Err(e) => futures::stream::iter(vec![Err(e)]),
        });

    Box::pin(chunk_stream)
}

// ============================================================================
// DELTA -> STREAMEVENT TRANSLATION
// ============================================================================

#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    started: bool,
}

/// Tracks in-flight tool calls by wire index so a call's `ToolUse` start
/// event fires exactly once, as soon as both `id` and `name` are known.
#[derive(Default)]
struct StreamTranslator {
    pending: HashMap<u32, PendingToolCall>,
}

impl StreamTranslator {
    fn translate(&mut self, chunk: OpenAIChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::TextDelta { text: content });
                }
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for delta in tool_calls {
                    let entry = self.pending.entry(delta.index).or_default();

                    if let Some(id) = delta.id {
                        entry.id = Some(id);
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name {
                            entry.name = Some(name);
                        }

                        if !entry.started {
                            if let (Some(id), Some(name)) = (entry.id.clone(), entry.name.clone()) {
                                events.push(StreamEvent::ToolUse { id, name });
                                entry.started = true;
                            }
                        }

                        if let Some(arguments) = function.arguments {
                            if entry.started && !arguments.is_empty() {
                                events.push(StreamEvent::TextDelta { text: arguments });
                            }
                        }
                    }
                }
            }

            if choice.finish_reason.is_some() {
                events.push(StreamEvent::Stop);
            }
        }

        events
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

pub struct OpenAiProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build().map_err(Error::Http)?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn open_stream(&self, wire_request: &OpenAIRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(wire_request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::api(format!("API error {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<Result<StreamEvent>>> {
        let wire_request = request_to_wire(&request);
        let retry_config = self.retry_config.clone();

        let response = retry_with_backoff_conditional(retry_config, || self.open_stream(&wire_request)).await?;

        let chunk_stream = parse_sse_stream(response);
        let translated = chunk_stream.scan(StreamTranslator::default(), move |translator, chunk_result| {
            let result = match chunk_result {
                Ok(chunk) => translator.translate(chunk).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(result))
        });

        let flattened = translated.flat_map(futures::stream::iter);

        let cancel_gated = flattened.take_while(move |_| {
            let still_open = !cancel.is_cancelled();
            futures::future::ready(still_open)
        });

        Ok(Box::pin(cancel_gated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_translator_emits_tool_use_once_id_and_name_known() {
        let mut translator = StreamTranslator::default();

        let chunk = OpenAIChunk {
            choices: vec![OpenAIChoice {
                delta: OpenAIDelta {
                    content: None,
                    tool_calls: Some(vec![OpenAIToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        function: Some(OpenAIFunctionDelta {
                            name: Some("search".to_string()),
                            arguments: Some("{\"q\":".to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
        };

        let events = translator.translate(chunk);
        assert!(matches!(events[0], StreamEvent::ToolUse { .. }));
        assert!(matches!(events[1], StreamEvent::TextDelta { .. }));
    }

    #[test]
    fn test_stream_translator_emits_stop_on_finish_reason() {
        let mut translator = StreamTranslator::default();
        let chunk = OpenAIChunk {
            choices: vec![OpenAIChoice {
                delta: OpenAIDelta::default(),
                finish_reason: Some("stop".to_string()),
            }],
        };
        let events = translator.translate(chunk);
        assert!(matches!(events.last(), Some(StreamEvent::Stop)));
    }

    #[test]
    fn test_message_to_wire_bare_tool_result_becomes_tool_role() {
        let message = crate::types::Message::tool_result("t1", "done", false);
        let wire = message_to_wire(&message);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id, Some("t1".to_string()));
    }
}
