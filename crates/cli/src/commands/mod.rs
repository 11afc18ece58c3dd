pub mod chat;
pub mod health;
pub mod ingest;
pub mod web;

use std::sync::Arc;

use ragchat_config::AppConfig;
use ragchat_core::provider::InferenceEngine;
use ragchat_knowledge::IndexRetriever;
use ragchat_providers::OpenAiCompatEngine;
use ragchat_serving::ServingPipeline;
use tracing::info;

/// Engine for the `[inference]` section, with embeddings when a model is set.
pub(crate) fn build_engine(config: &AppConfig) -> Result<OpenAiCompatEngine, Box<dyn std::error::Error>> {
    let engine = OpenAiCompatEngine::from_config(&config.inference)?;
    Ok(match &config.knowledge.embedding_model {
        Some(model) => engine.with_embedding_model(model.clone()),
        None => engine,
    })
}

/// Wire the passage index and inference engine into a serving pipeline.
///
/// Fails when the index has not been built yet.
pub(crate) fn build_pipeline(config: &AppConfig) -> Result<Arc<ServingPipeline>, Box<dyn std::error::Error>> {
    let engine: Arc<dyn InferenceEngine> = Arc::new(build_engine(config)?);

    let retriever = IndexRetriever::open(&config.knowledge.index_path)?;
    let retriever = if config.knowledge.embedding_model.is_some() {
        retriever.with_embedder(engine.clone())
    } else {
        retriever
    };

    info!(
        model = %config.inference.model,
        index = %config.knowledge.index_path.display(),
        profile = ?config.performance.prompt_profile,
        "Serving pipeline assembled"
    );
    Ok(Arc::new(ServingPipeline::from_config(config, Arc::new(retriever), engine)))
}
