//! Language model capability and the hosted chat-completions client.
//!
//! The query pipeline depends only on the [`LanguageModel`] trait:
//! `complete` returns the full text, `stream_complete` returns a finite,
//! forward-only [`TextStream`] of fragments whose concatenation is the same
//! text. Any provider can implement it.
//!
//! [`ChatCompletionsModel`] talks to an OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint (Groq by default):
//!
//! ```json
//! { "model": "llama3-70b-8192",
//!   "messages": [{ "role": "user", "content": "<prompt>" }],
//!   "temperature": 0.3,
//!   "stream": false }
//! ```
//!
//! Streaming responses are server-sent events; each `data:` line carries a
//! JSON delta until `data: [DONE]`.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

/// Incremental completion output.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider/model label for logs and status output.
    fn name(&self) -> &str;

    /// Generate the full completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generate the completion as a stream of fragments.
    ///
    /// The default yields the whole of [`complete`](LanguageModel::complete)
    /// as one fragment.
    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let text = self.complete(prompt).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions API.
pub struct ChatCompletionsModel {
    name: String,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatCompletionsModel {
    /// Build a client, reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] when the credential is missing or empty.
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RagError::Configuration(format!(
                    "missing credential: set the {} environment variable",
                    config.api_key_env
                ))
            })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("chat-completions:{}", config.model),
            model: config.model.clone(),
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            client,
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Completion(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Completion(format!(
                "API error {}: {}",
                status,
                text.trim()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Completion(format!("invalid response body: {}", e)))?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::Completion("response contained no choices".into()))?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TextStream> {
        let response = self.send(prompt, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        let state = SseState {
            bytes,
            decoder: SseDecoder::default(),
            pending: Vec::new(),
            finished: false,
        };

        let fragments = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop() {
                    return Some((Ok(fragment), state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = state.decoder.push(&chunk);
                        state.finished = events.done;
                        // Reversed so pop() yields in arrival order.
                        state.pending = events.fragments.into_iter().rev().collect();
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((
                            Err(RagError::Completion(format!("stream interrupted: {}", e))),
                            state,
                        ));
                    }
                    None => {
                        state.finished = true;
                        state.pending = state.decoder.finish().into_iter().rev().collect();
                    }
                }
            }
        });

        Ok(fragments.boxed())
    }
}

struct SseState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: Vec<String>,
    finished: bool,
}

#[derive(Debug, Default, PartialEq)]
struct SseEvents {
    fragments: Vec<String>,
    done: bool,
}

/// Incremental decoder for chat-completion server-sent events.
///
/// Network chunks may split lines anywhere; incomplete lines are buffered
/// until their newline arrives.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> SseEvents {
        self.buffer.extend_from_slice(chunk);
        let mut fragments = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim(), &mut fragments);
        }

        SseEvents {
            fragments,
            done: self.done,
        }
    }

    /// Flush a trailing line that arrived without a newline.
    fn finish(&mut self) -> Vec<String> {
        let mut fragments = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.handle_line(line.trim(), &mut fragments);
        }
        fragments
    }

    fn handle_line(&mut self, line: &str, fragments: &mut Vec<String>) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
            if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                if !content.is_empty() {
                    fragments.push(content.to_string());
                }
            }
        }
    }
}

/// Collect a fragment stream into the full text.
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}
