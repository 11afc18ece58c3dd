//! Inference engine trait: the abstraction over text-generation backends.
//!
//! An engine turns a fully rendered prompt into answer text, either in one
//! piece or as an ordered stream of fragments. The serving pipeline never
//! knows which backend it is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A single generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The fully rendered prompt
    pub prompt: String,

    /// Sampling temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Ordered answer fragments. An `Err` item ends the stream.
pub type FragmentStream = tokio::sync::mpsc::Receiver<std::result::Result<String, ProviderError>>;

/// The core inference trait.
///
/// Every generation backend (OpenAI-compatible server, Ollama, scripted test
/// double) implements this trait.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "ollama").
    fn name(&self) -> &str;

    /// Generate the whole answer at once.
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<String, ProviderError>;

    /// Generate the answer as a stream of fragments.
    ///
    /// Default implementation calls `complete()` and yields a single fragment.
    async fn stream(&self, request: CompletionRequest) -> std::result::Result<FragmentStream, ProviderError> {
        let text = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }

    /// Embed texts into vectors for similarity search.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(&self, _inputs: Vec<String>) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Engine '{}' does not support embeddings",
            self.name()
        )))
    }

    /// Can we reach the engine?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
