//! OpenAI-compatible inference engine.
//!
//! Works with: Ollama, vLLM, llama.cpp server, OpenAI, and any endpoint that
//! exposes `/chat/completions`, `/embeddings` and `/models`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Embeddings for the passage index
//! - Health checks

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ragchat_config::InferenceConfig;
use ragchat_core::error::ProviderError;
use ragchat_core::provider::{CompletionRequest, FragmentStream, InferenceEngine};
use serde::Deserialize;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible inference engine.
///
/// The rendered prompt is sent as a single user message; the model answers
/// with one assistant message.
pub struct OpenAiCompatEngine {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenAiCompatEngine {
    /// Create a new engine talking to `base_url` with the given model.
    ///
    /// `timeout` bounds whole non-streaming requests. A streamed answer may
    /// run longer, as long as no single read waits more than `timeout`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: None,
            client,
            timeout,
        })
    }

    /// Create an Ollama engine (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
            Duration::from_secs(120),
        )
    }

    /// Build an engine from the `[inference]` config section.
    pub fn from_config(config: &InferenceConfig) -> Result<Self, ProviderError> {
        Self::new(
            "openai-compat",
            config.base_url.clone(),
            config.api_key.clone().unwrap_or_else(|| "ollama".into()),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Enable `/embeddings` with the given model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        accept_sse: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if accept_sse {
            builder = builder.header("Accept", "text/event-stream");
        } else {
            builder = builder.timeout(self.timeout);
        }

        let response = builder.json(body).send().await.map_err(map_send_error)?;
        check_status(response).await
    }
}

/// Map a transport failure onto the error taxonomy.
fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-200 response into the matching `ProviderError`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let error_body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ModelNotFound(error_body));
    }

    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Inference endpoint returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl InferenceEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        debug!(engine = %self.name, model = %self.model, "Sending completion request");

        let body = self.chat_body(&request, false);
        let response = self.post_json("/chat/completions", &body, false).await?;

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        debug!(engine = %self.name, model = %self.model, "Sending streaming request");

        let body = self.chat_body(&request, true);
        let response = self.post_json("/chat/completions", &body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let engine_name = self.name.clone();

        // Spawn task to read the SSE byte stream and forward content deltas
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a multibyte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                // Process complete lines
                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let Ok(line) = std::str::from_utf8(&raw[..line_end]) else {
                        warn!(engine = %engine_name, "Dropping SSE line that is not valid UTF-8");
                        continue;
                    };

                    match parse_sse_line(line.trim_end_matches('\r')) {
                        SseLine::Skip => {}
                        SseLine::Done => return,
                        SseLine::Content(fragment) => {
                            if tx.send(Ok(fragment)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseLine::Unparseable(data) => {
                            trace!(engine = %engine_name, data = %data, "Ignoring unparseable SSE chunk");
                        }
                    }
                }
            }

            // Stream ended without [DONE]; the receiver sees end-of-stream.
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Err(ProviderError::NotConfigured(format!(
                "Engine '{}' has no embedding model configured",
                self.name
            )));
        };

        debug!(engine = %self.name, model = %model, count = inputs.len(), "Sending embedding request");

        let body = serde_json::json!({
            "model": model,
            "input": inputs,
            "encoding_format": "float",
        });
        let response = self.post_json("/embeddings", &body, false).await?;

        let api_resp: EmbeddingApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse embedding response: {e}"),
        })?;

        Ok(api_resp.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_send_error)?;

        Ok(response.status().is_success())
    }
}

// --- SSE line handling ---

/// What a single SSE line means for the fragment stream.
#[derive(Debug, PartialEq)]
enum SseLine {
    /// Blank line, comment, or a chunk with no content
    Skip,
    /// `data: [DONE]`
    Done,
    Content(String),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }

    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamResponse>(data) {
        Ok(resp) => match resp.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(content) if !content.is_empty() => SseLine::Content(content),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Unparseable(data.to_string()),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
