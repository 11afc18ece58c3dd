//! [`Retriever`] over a loaded [`PassageIndex`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ragchat_core::error::{Classify, ErrorKind, RetrievalError};
use ragchat_core::provider::InferenceEngine;
use ragchat_core::retriever::{RetrievedPassage, Retriever};
use tracing::debug;

use crate::index::{Passage, PassageIndex};

/// Smallest and largest `k` a search will honor.
pub const MIN_K: usize = 1;
pub const MAX_K: usize = 10;

/// Top-k search over an in-memory passage index.
///
/// Uses cosine similarity when an embedder is attached and every passage
/// has an embedding; keyword overlap otherwise.
pub struct IndexRetriever {
    index: PassageIndex,
    embedder: Option<Arc<dyn InferenceEngine>>,
}

impl IndexRetriever {
    pub fn new(index: PassageIndex) -> Self {
        Self { index, embedder: None }
    }

    /// Load the index file at `path`.
    pub fn open(path: &Path) -> Result<Self, RetrievalError> {
        Ok(Self::new(PassageIndex::load(path)?))
    }

    /// Embed queries with `engine` for similarity search.
    pub fn with_embedder(mut self, engine: Arc<dyn InferenceEngine>) -> Self {
        self.embedder = Some(engine);
        self
    }

    async fn embed_query(&self, engine: &dyn InferenceEngine, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let vectors = engine.embed(vec![query.to_string()]).await.map_err(|e| match e.kind() {
            ErrorKind::Timeout => RetrievalError::Timeout(e.to_string()),
            _ => RetrievalError::EmbeddingFailed(e.to_string()),
        })?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("empty embedding response".into()))
    }
}

fn to_retrieved(passages: Vec<&Passage>) -> Vec<RetrievedPassage> {
    passages
        .into_iter()
        .enumerate()
        .map(|(rank, p)| RetrievedPassage {
            text: p.text.clone(),
            source: p.source.clone(),
            rank,
        })
        .collect()
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let k = k.clamp(MIN_K, MAX_K);

        let hits = match self.embedder.as_deref() {
            Some(engine) if self.index.has_embeddings() => {
                let embedding = self.embed_query(engine, query).await?;
                self.index.vector_search(&embedding, k)
            }
            _ => self.index.keyword_search(query, k),
        };

        debug!(k, hits = hits.len(), "Passage search complete");
        Ok(to_retrieved(hits))
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.index.len())
    }
}
