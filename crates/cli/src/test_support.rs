//! Fixed collaborators for command tests.

use std::sync::Arc;

use async_trait::async_trait;
use ragchat_core::error::{ProviderError, RetrievalError};
use ragchat_core::provider::{CompletionRequest, FragmentStream, InferenceEngine};
use ragchat_core::retriever::{RetrievedPassage, Retriever};
use ragchat_serving::ServingPipeline;

/// Streams a fixed answer in the given fragments.
pub(crate) struct FragmentEngine(pub Vec<&'static str>);

#[async_trait]
impl InferenceEngine for FragmentEngine {
    fn name(&self) -> &str {
        "fragments"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
        Ok(self.0.concat())
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.0.len().max(1));
        for fragment in &self.0 {
            let _ = tx.try_send(Ok(fragment.to_string()));
        }
        Ok(rx)
    }
}

pub(crate) struct HandbookRetriever;

#[async_trait]
impl Retriever for HandbookRetriever {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        Ok(vec![
            RetrievedPassage::new("Full-time employees receive 15 days of paid vacation per year.", 0)
                .with_source("handbook.md#0"),
        ]
        .into_iter()
        .take(k)
        .collect())
    }
}

pub(crate) fn handbook_pipeline(fragments: Vec<&'static str>) -> Arc<ServingPipeline> {
    Arc::new(ServingPipeline::new(
        Arc::new(HandbookRetriever),
        Arc::new(FragmentEngine(fragments)),
    ))
}
