//! Inference engine implementations for ragchat.
//!
//! All engines implement the `ragchat_core::InferenceEngine` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatEngine;
