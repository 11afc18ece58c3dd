//! Lexical query traits used to pick prompt tone.
//!
//! Never gates retrieval or caching.

use serde::Serialize;

const GREETINGS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "greetings",
    "howdy",
];

const THANKS: &[&str] = &["thanks", "thank you", "thx", "appreciate", "grateful", "cheers"];

const INTERROGATIVES: &[&str] = &[
    "what",
    "how",
    "why",
    "when",
    "where",
    "who",
    "which",
    "can you",
    "could you",
    "explain",
    "tell me",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryTraits {
    pub is_greeting: bool,
    pub is_thanks: bool,
    /// A literal `?` or an interrogative word is present.
    pub has_question_marker: bool,
}

/// Classify `query` by case-insensitive keyword matching.
///
/// Keywords match on word boundaries of a punctuation-stripped copy, so
/// "hi" matches "Hi!" but not "this".
pub fn classify(query: &str) -> QueryTraits {
    let padded = format!(" {} ", word_form(query));
    let any = |words: &[&str]| words.iter().any(|w| padded.contains(&format!(" {w} ")));

    QueryTraits {
        is_greeting: any(GREETINGS),
        is_thanks: any(THANKS),
        has_question_marker: query.contains('?') || any(INTERROGATIVES),
    }
}

/// Lowercase, punctuation replaced by spaces, whitespace collapsed.
fn word_form(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
