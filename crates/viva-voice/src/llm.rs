//! Streaming language-model client for OpenAI-compatible chat endpoints.
//!
//! Sends `stream: true` chat-completions requests and decodes the SSE
//! response body into a token stream. Token caps, temperature, and the
//! request timeout all come from configuration — the orchestrator treats a
//! timeout the same as any other provider failure.

use crate::capability::{LanguageModel, TokenStream};
use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use viva_types::{ChatMessage, ChatRole};

/// Configuration for the chat-completions provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API, without a trailing slash.
    pub endpoint: String,
    /// Bearer credential, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model name to request.
    pub model: String,
    /// Cap on generated tokens per turn.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whole-request timeout, including the streamed body.
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// Streaming chat-completions [`LanguageModel`].
#[derive(Debug, Clone)]
pub struct ChatLlm {
    http: reqwest::Client,
    config: LlmConfig,
}

impl ChatLlm {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl LanguageModel for ChatLlm {
    async fn stream(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        user_text: &str,
    ) -> Result<TokenStream, VoiceError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage {
            role: "system",
            content: system_prompt,
        });
        for entry in history {
            messages.push(WireMessage {
                role: match entry.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: &entry.text,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: user_text,
        });

        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.config.endpoint);
        let mut request = self.http.post(&url).timeout(self.config.timeout).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!(
                "completion request failed with {}: {}",
                status, detail
            )));
        }

        let timeout_secs = self.config.timeout.as_secs();
        let state = SseStreamState {
            inner: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
            timeout_secs,
        };

        Ok(Box::pin(futures_util::stream::unfold(
            state,
            |mut state| async move {
                loop {
                    if let Some(token) = state.pending.pop_front() {
                        return Some((Ok(token), state));
                    }
                    if state.done {
                        return None;
                    }
                    match state.inner.next().await {
                        None => {
                            state.done = true;
                        }
                        Some(Err(e)) => {
                            state.done = true;
                            let err = if e.is_timeout() {
                                VoiceError::Timeout {
                                    what: "LLM completion",
                                    secs: state.timeout_secs,
                                }
                            } else {
                                VoiceError::Llm(format!("stream read failed: {}", e))
                            };
                            return Some((Err(err), state));
                        }
                        Some(Ok(bytes)) => {
                            for item in state.decoder.feed(&String::from_utf8_lossy(&bytes)) {
                                match item {
                                    SseItem::Token(token) => state.pending.push_back(token),
                                    SseItem::Done => state.done = true,
                                }
                            }
                        }
                    }
                }
            },
        )))
    }
}

struct SseStreamState {
    inner: Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
    timeout_secs: u64,
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> VoiceError {
    if e.is_timeout() {
        VoiceError::Timeout {
            what: "LLM completion",
            secs: timeout.as_secs(),
        }
    } else {
        VoiceError::Llm(format!("completion request failed: {}", e))
    }
}

/// One decoded SSE payload.
#[derive(Debug, PartialEq, Eq)]
enum SseItem {
    /// A content delta.
    Token(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental decoder for `data:`-framed SSE chat-completion chunks.
///
/// Holds a partial-line carry buffer because network chunks split anywhere,
/// including mid-JSON.
#[derive(Default)]
struct SseDecoder {
    carry: String,
}

impl SseDecoder {
    fn feed(&mut self, chunk: &str) -> Vec<SseItem> {
        self.carry.push_str(chunk);
        let mut items = Vec::new();

        while let Some(newline) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=newline).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                items.push(SseItem::Done);
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(value) => {
                    if let Some(delta) = value
                        .pointer("/choices/0/delta/content")
                        .and_then(|v| v.as_str())
                    {
                        if !delta.is_empty() {
                            items.push(SseItem::Token(delta.to_string()));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("skipping malformed SSE chunk: {}", e);
                }
            }
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_extracts_content_deltas() {
        let mut decoder = SseDecoder::default();
        let items = decoder.feed(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n",
        );
        assert_eq!(
            items,
            vec![
                SseItem::Token("Hello".to_string()),
                SseItem::Token(" there".to_string())
            ]
        );
    }

    #[test]
    fn decoder_handles_split_lines_across_feeds() {
        let mut decoder = SseDecoder::default();
        let first = decoder.feed("data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty(), "partial line must be carried");

        let second = decoder.feed("tent\":\"Hi\"}}]}\n");
        assert_eq!(second, vec![SseItem::Token("Hi".to_string())]);
    }

    #[test]
    fn decoder_recognizes_done_sentinel() {
        let mut decoder = SseDecoder::default();
        let items = decoder.feed("data: [DONE]\n");
        assert_eq!(items, vec![SseItem::Done]);
    }

    #[test]
    fn decoder_skips_empty_deltas_and_noise() {
        let mut decoder = SseDecoder::default();
        let items = decoder.feed(
            ": keep-alive comment\n\
             data: {\"choices\":[{\"delta\":{}}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
        );
        assert_eq!(items, vec![SseItem::Token("x".to_string())]);
    }
}
