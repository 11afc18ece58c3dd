//! The conversational inference-serving pipeline.
//!
//! A raw utterance flows through:
//!
//! 1. **Validate**: trim, bound, reject unsafe markup, collapse whitespace
//! 2. **Cache lookup**: keyed on the full history plus the sanitized query
//! 3. **Admit**: wait for one of N inference slots
//! 4. **Retrieve**: top-k passages, under the storage retry policy
//! 5. **Optimize**: pack passages into the profile's context budget
//! 6. **Infer**: one-shot or streamed, under the inference retry policy
//! 7. **Record**: cache the answer, count the outcome
//!
//! [`ChatSession`] repeats this per message on a long-lived connection and
//! owns that connection's history.

pub mod admission;
pub mod cache;
pub mod classifier;
pub mod context;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod stream_event;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use admission::{AdmissionController, AdmissionError, AdmissionPermit};
pub use cache::{CacheKey, ConversationCache};
pub use classifier::{QueryTraits, classify};
pub use context::{ContextBudget, NO_CONTEXT_SENTINEL, optimize};
pub use pipeline::{ServeError, ServingPipeline, TurnAnswer, WarmUpReport};
pub use prompt::build_prompt;
pub use ragchat_config::PromptProfile;
pub use retry::{RetryAttempt, RetryError, RetryPolicy};
pub use session::{ChatSession, SessionState};
pub use stream_event::SessionEvent;
pub use validation::InputValidator;
