//! Passage index for ragchat.
//!
//! Ingestion turns a directory of text documents into overlapping chunks
//! stored as JSON lines; [`IndexRetriever`] loads that file and answers
//! top-k queries for the serving pipeline.

pub mod chunker;
pub mod index;
pub mod ingest;
pub mod retriever;
pub mod vector;

pub use chunker::split_text;
pub use index::{Passage, PassageIndex};
pub use ingest::{IngestReport, ingest};
pub use retriever::IndexRetriever;
pub use vector::cosine_similarity;
