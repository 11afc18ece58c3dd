//! Ingestion: load documents, chunk, optionally embed, persist.

use std::path::{Path, PathBuf};

use ragchat_config::KnowledgeConfig;
use ragchat_core::error::RetrievalError;
use ragchat_core::provider::InferenceEngine;
use tracing::{info, warn};

use crate::chunker::split_text;
use crate::index::{Passage, PassageIndex};

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];
const EMBED_BATCH: usize = 32;

/// Outcome of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub documents: usize,
    pub passages: usize,
    pub embedded: bool,
    pub index_path: PathBuf,
}

/// Build the passage index described by `config`.
///
/// When `embedder` is given, every passage is embedded and the index
/// supports similarity search; otherwise it is keyword-only.
pub async fn ingest(
    config: &KnowledgeConfig,
    embedder: Option<&dyn InferenceEngine>,
) -> Result<IngestReport, RetrievalError> {
    let documents = load_documents(&config.base_dir)?;
    if documents.is_empty() {
        return Err(RetrievalError::Storage(format!(
            "No .txt or .md files found in '{}'",
            config.base_dir.display()
        )));
    }
    info!(count = documents.len(), dir = %config.base_dir.display(), "Loaded documents");

    let mut passages = Vec::new();
    for (source, text) in &documents {
        for (n, chunk) in split_text(text, config.chunk_size, config.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            passages.push(Passage {
                id: format!("{source}#{n}"),
                text: chunk,
                source: Some(source.clone()),
                embedding: None,
            });
        }
    }
    info!(count = passages.len(), "Split documents into passages");

    if let Some(engine) = embedder {
        embed_passages(engine, &mut passages).await?;
    }

    let index = PassageIndex::new(&config.index_path, passages);
    index.save()?;
    info!(path = %config.index_path.display(), "Passage index written");

    Ok(IngestReport {
        documents: documents.len(),
        passages: index.len(),
        embedded: embedder.is_some(),
        index_path: config.index_path.clone(),
    })
}

/// Read every supported file directly under `dir`, sorted by file name.
///
/// Returns `(file name, contents)` pairs. Unreadable files are skipped.
pub fn load_documents(dir: &Path) -> Result<Vec<(String, String)>, RetrievalError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        RetrievalError::Storage(format!("Cannot read knowledge base '{}': {e}", dir.display()))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_supported(p))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match std::fs::read_to_string(&path) {
            Ok(text) => documents.push((name, text)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
        }
    }

    Ok(documents)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

async fn embed_passages(engine: &dyn InferenceEngine, passages: &mut [Passage]) -> Result<(), RetrievalError> {
    for batch in passages.chunks_mut(EMBED_BATCH) {
        let inputs = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = engine
            .embed(inputs)
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        if vectors.len() != batch.len() {
            return Err(RetrievalError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        for (passage, vector) in batch.iter_mut().zip(vectors) {
            passage.embedding = Some(vector);
        }
    }
    Ok(())
}
