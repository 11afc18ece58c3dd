//! `ragchat ingest`: build the passage index from the knowledge base.

use ragchat_config::AppConfig;
use ragchat_core::provider::InferenceEngine;
use tracing::{error, info};

use super::build_engine;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(dir = %config.knowledge.base_dir.display(), "Starting document ingestion");

    let embedder = match config.knowledge.embedding_model {
        Some(_) => Some(build_engine(config)?),
        None => None,
    };
    let embedder = embedder.as_ref().map(|e| e as &dyn InferenceEngine);

    let report = ragchat_knowledge::ingest(&config.knowledge, embedder)
        .await
        .inspect_err(|e| error!("Document ingestion failed: {e}"))?;

    info!(
        documents = report.documents,
        passages = report.passages,
        embedded = report.embedded,
        "Document ingestion completed"
    );
    println!(
        "Indexed {} passages from {} documents into {}{}",
        report.passages,
        report.documents,
        report.index_path.display(),
        if report.embedded { " (with embeddings)" } else { "" }
    );
    Ok(())
}
