//! Remote backend — OpenAI-compatible chat completions over HTTP(S).
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any other endpoint
//! exposing the `/chat/completions` shape. The agent renders the whole
//! conversation into a single prompt string, so each request carries a
//! one-message array with role `user`.
//!
//! Supports:
//! - Blocking completions
//! - Streaming via Server-Sent-Events (`data: {...}` lines, `[DONE]` sentinel)
//! - Upstream error extraction from `{"error":{"message":...}}` bodies

use async_trait::async_trait;
use colloquy_core::BackendError;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::model::RemoteConfig;
use crate::{Backend, BackendInfo, GenerationParams, TokenStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// An OpenAI-compatible remote backend.
pub struct RemoteBackend {
    endpoint: reqwest::Url,
    api_key: String,
    model: String,
    context_size: usize,
    client: reqwest::Client,
}

impl RemoteBackend {
    /// Create a remote backend from its configuration.
    ///
    /// Fails with [`BackendError::Init`] when the endpoint URL is invalid
    /// or the HTTP client cannot be constructed. No request is issued at
    /// construction time.
    pub fn new(config: &RemoteConfig) -> Result<Self, BackendError> {
        let endpoint = parse_endpoint(&config.endpoint)?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Init(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            context_size: config.context_size,
            client,
        })
    }

    /// The `/chat/completions` URL under the configured endpoint.
    fn chat_url(&self) -> reqwest::Url {
        chat_completions_url(&self.endpoint)
    }

    fn request_body(&self, prompt: &str, params: &GenerationParams, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": params.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn post(
        &self,
        prompt: &str,
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let url = self.chat_url();
        debug!(model = %self.model, url = %url, stream, "Sending chat completion request");

        let timeout = if stream { STREAM_READ_TIMEOUT } else { READ_TIMEOUT };
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, params, stream))
            .send()
            .await
            .map_err(|e| BackendError::Http {
                status: None,
                message: format!("Failed to connect to API endpoint: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body);
            warn!(status = status.as_u16(), %message, "API request failed");
            return Err(BackendError::Http {
                status: Some(status.as_u16()),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let response = self.post(prompt, params, false).await?;

        let api_response: ChatResponse = response.json().await.map_err(|e| BackendError::Http {
            status: None,
            message: format!("Failed to parse response: {e}"),
        })?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Inference("No content in API response".into()))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        let response = self.post(prompt, params, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the SSE byte stream and forward content deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(BackendError::Http {
                                status: None,
                                message: format!("Stream interrupted: {e}"),
                            }))
                            .await;
                        return;
                    }
                };

                for event in parser.push(&bytes) {
                    match event {
                        SseEvent::Token(token) => {
                            if tx.send(Ok(token)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseEvent::Done => return,
                    }
                }
            }
        });

        Ok(rx)
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: "openai".into(),
            device: "remote".into(),
            gpu_layers_loaded: 0,
            memory_bytes: 0,
            context_size: self.context_size,
        }
    }
}

/// Validate an endpoint URL: http or https only.
fn parse_endpoint(endpoint: &str) -> Result<reqwest::Url, BackendError> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| BackendError::Init(format!("Invalid API endpoint URL '{endpoint}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BackendError::Init(format!(
            "Unsupported URL scheme '{other}' in API endpoint '{endpoint}'"
        ))),
    }
}

/// Append `chat/completions` to the endpoint path, inserting a slash when
/// the base path lacks a trailing one.
fn chat_completions_url(base: &reqwest::Url) -> reqwest::Url {
    let mut url = base.clone();
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{path}/chat/completions"));
    url
}

/// Pull the upstream error message out of a non-2xx body when it parses as
/// `{"error":{"message":...}}`; otherwise return the raw body.
fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.to_string(),
    }
}

// --- SSE parsing ---

/// An event produced by the SSE parser.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    /// A content delta extracted from a `data:` payload
    Token(String),
    /// The `data: [DONE]` sentinel
    Done,
}

/// Incremental parser for an OpenAI-style SSE stream.
///
/// Bytes arrive in arbitrary chunks; the parser buffers until complete
/// lines are available, extracts `data:` payloads, and pulls
/// `choices[0].delta.content` out of each. Malformed payloads are skipped
/// without terminating the stream.
struct SseParser {
    buffer: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            // Skip blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(SseEvent::Done);
                return events;
            }

            match extract_delta_content(data) {
                Some(content) if !content.is_empty() => events.push(SseEvent::Token(content)),
                Some(_) => {}
                None => trace!(payload = %data, "Ignoring unparseable SSE chunk"),
            }
        }
        events
    }
}

/// Extract `choices[0].delta.content` from a streaming chunk payload.
/// Returns `None` when the payload is not valid JSON of the expected shape.
fn extract_delta_content(data: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct StreamResponse {
        #[serde(default)]
        choices: Vec<StreamChoice>,
    }
    #[derive(Deserialize)]
    struct StreamChoice {
        #[serde(default)]
        delta: StreamDelta,
    }
    #[derive(Deserialize, Default)]
    struct StreamDelta {
        #[serde(default)]
        content: Option<String>,
    }

    let parsed: StreamResponse = serde_json::from_str(data).ok()?;
    Some(
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .unwrap_or_default(),
    )
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
