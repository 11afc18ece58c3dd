//! Prompt templates.
//!
//! Two fixed templates, chosen by [`PromptProfile`]. Both carry the same four
//! inputs: history, packed context, question, and a tone hint.

use ragchat_config::PromptProfile;
use ragchat_core::message::ConversationHistory;

use crate::classifier::QueryTraits;
use crate::context::NO_CONTEXT_SENTINEL;

const NO_HISTORY: &str = "(no previous conversation)";

const NO_CONTEXT_BLOCK: &str = "No relevant documents were found for this question. \
Tell the user that you don't have information about it in the knowledge base \
and suggest rephrasing or asking about another topic. Do not guess.";

/// Render the prompt sent to the inference engine.
pub fn build_prompt(
    profile: PromptProfile,
    history: &ConversationHistory,
    context: &str,
    question: &str,
    traits: QueryTraits,
) -> String {
    let history = if history.is_empty() {
        NO_HISTORY.to_string()
    } else {
        history.serialize()
    };
    let tone = tone_hint(traits);

    match profile {
        PromptProfile::Enhanced => enhanced(&history, context, question, tone),
        PromptProfile::Streamlined => streamlined(&history, context, question, tone),
    }
}

fn enhanced(history: &str, context: &str, question: &str, tone: Option<&str>) -> String {
    let mut out = String::from(
        "You are a helpful assistant answering questions about the organization's documents.\n\
         Answer based only on the context below. If the context does not contain the answer, \
         say that you don't know.\n",
    );
    if let Some(tone) = tone {
        out.push_str(tone);
        out.push('\n');
    }

    out.push_str("\nConversation so far:\n");
    out.push_str(history);
    out.push_str("\n\n");

    if context == NO_CONTEXT_SENTINEL {
        out.push_str("No context available:\n");
        out.push_str(NO_CONTEXT_BLOCK);
    } else {
        out.push_str("Context:\n");
        out.push_str(context);
    }

    out.push_str(&format!("\n\nQuestion:\n{question}\n\nAnswer:"));
    out
}

fn streamlined(history: &str, context: &str, question: &str, tone: Option<&str>) -> String {
    let context = if context == NO_CONTEXT_SENTINEL {
        format!("[none] {NO_CONTEXT_BLOCK}")
    } else {
        context.to_string()
    };
    let tone = tone.map(|t| format!("{t}\n")).unwrap_or_default();

    format!(
        "Answer briefly using only the context. Say you don't know if it is not there.\n\
         {tone}History:\n{history}\nContext:\n{context}\nQ: {question}\nA:"
    )
}

fn tone_hint(traits: QueryTraits) -> Option<&'static str> {
    if traits.is_greeting {
        Some("The user is greeting you. Reply warmly and briefly, then offer to help.")
    } else if traits.is_thanks {
        Some("The user is thanking you. Acknowledge it briefly and offer further help.")
    } else {
        None
    }
}
