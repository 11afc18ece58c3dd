//! Retriever trait: the abstraction over passage stores.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// One passage returned by a search, in relevance order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Passage text, unprocessed
    pub text: String,

    /// Where the passage came from (file name, URL, ...)
    #[serde(default)]
    pub source: Option<String>,

    /// Zero-based position in the result list (0 = most relevant)
    pub rank: usize,
}

impl RetrievedPassage {
    pub fn new(text: impl Into<String>, rank: usize) -> Self {
        Self {
            text: text.into(),
            source: None,
            rank,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Similarity search over an indexed corpus.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` passages most relevant to `query`, most relevant first.
    async fn search(&self, query: &str, k: usize) -> std::result::Result<Vec<RetrievedPassage>, RetrievalError>;

    /// Number of indexed passages.
    async fn count(&self) -> std::result::Result<usize, RetrievalError> {
        Ok(0)
    }
}
