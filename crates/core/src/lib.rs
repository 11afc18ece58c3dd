//! # ragchat core
//!
//! Domain types, collaborator traits, and error definitions for the ragchat
//! conversational serving pipeline. This crate has **no framework
//! dependencies**: it defines the domain model every other crate builds on.
//!
//! ## Design Philosophy
//!
//! The external collaborators (inference engine, passage retriever) are
//! defined as traits here. Implementations live in their own crates, which
//! keeps the serving core testable with scripted stand-ins and keeps the
//! dependency graph pointing inward.

pub mod error;
pub mod message;
pub mod provider;
pub mod retriever;

// Re-export key types at crate root for ergonomics
pub use error::{Classify, ErrorKind};
pub use message::{ConversationHistory, ConversationTurn, Role};
pub use provider::{CompletionRequest, FragmentStream, InferenceEngine};
pub use retriever::{RetrievedPassage, Retriever};
