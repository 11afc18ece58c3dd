//! JSON-lines passage store.
//!
//! Each line is one [`Passage`]. The file is written once by ingestion and
//! loaded whole into memory for search; the format is human-inspectable
//! and needs no database.

use std::path::{Path, PathBuf};

use ragchat_core::error::RetrievalError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::vector::rank_by_similarity;

/// One indexed chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// `<source>#<chunk number>`
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// All passages of one index file, in ingestion order.
#[derive(Debug, Clone)]
pub struct PassageIndex {
    path: PathBuf,
    passages: Vec<Passage>,
}

impl PassageIndex {
    /// Wrap passages that will be saved to `path`.
    pub fn new(path: impl Into<PathBuf>, passages: Vec<Passage>) -> Self {
        Self {
            path: path.into(),
            passages,
        }
    }

    /// Load an index file. Corrupted lines are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RetrievalError::IndexMissing(format!(
                    "{} (run `ragchat ingest` first)",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RetrievalError::Storage(format!(
                    "Failed to read index {}: {e}",
                    path.display()
                )));
            }
        };

        let passages: Vec<Passage> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Passage>(line) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted index line");
                    None
                }
            })
            .collect();

        debug!(path = %path.display(), count = passages.len(), "Passage index loaded");
        Ok(Self::new(path, passages))
    }

    /// Write all passages to disk as JSONL, creating parent directories.
    pub fn save(&self) -> Result<(), RetrievalError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| RetrievalError::Storage(format!("Failed to create index directory: {e}")))?;
        }

        let mut content = String::new();
        for passage in &self.passages {
            let line = serde_json::to_string(passage)
                .map_err(|e| RetrievalError::Storage(format!("Failed to serialize passage: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, content)
            .map_err(|e| RetrievalError::Storage(format!("Failed to write index file: {e}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// True when every passage carries an embedding.
    pub fn has_embeddings(&self) -> bool {
        !self.passages.is_empty() && self.passages.iter().all(|p| p.embedding.is_some())
    }

    /// Rank passages by query term overlap.
    ///
    /// Score is the number of distinct query terms a passage contains, then
    /// total term occurrences. Passages matching no term are left out; equal
    /// scores keep ingestion order.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Vec<&Passage> {
        let mut terms = tokenize(query);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<((usize, usize), &Passage)> = self
            .passages
            .iter()
            .filter_map(|p| {
                let words = tokenize(&p.text);
                let mut distinct = 0;
                let mut total = 0;
                for term in &terms {
                    let hits = words.iter().filter(|w| *w == term).count();
                    if hits > 0 {
                        distinct += 1;
                        total += hits;
                    }
                }
                (distinct > 0).then_some(((distinct, total), p))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);
        scored.into_iter().map(|(_, p)| p).collect()
    }

    /// Rank passages by embedding similarity.
    pub fn vector_search(&self, query_embedding: &[f32], limit: usize) -> Vec<&Passage> {
        rank_by_similarity(&self.passages, query_embedding, limit)
    }
}

/// Lowercased alphanumeric terms.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
