//! Context optimizer: packs ranked passages into a character budget.

use ragchat_config::PromptProfile;
use ragchat_core::retriever::RetrievedPassage;

/// Returned instead of a context when there is nothing to pack.
///
/// Prompt templates compare against this value and render a distinct
/// "no information" block for it.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant information was found in the knowledge base.";

const SEPARATOR: &str = "\n\n";
const ELLIPSIS: &str = "...";
const SENTENCE_CUT_RATIO: f64 = 0.7;

/// Character limits for one packing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Upper bound on the returned context, separators included.
    pub max_total_chars: usize,
    /// Each passage is cut to this length before packing.
    pub max_passage_chars: usize,
    /// A truncated tail passage is added only when more than this many
    /// characters are left.
    pub min_tail_chars: usize,
}

impl ContextBudget {
    pub const fn enhanced() -> Self {
        Self {
            max_total_chars: 4000,
            max_passage_chars: 1200,
            min_tail_chars: 150,
        }
    }

    pub const fn streamlined() -> Self {
        Self {
            max_total_chars: 1800,
            max_passage_chars: 600,
            min_tail_chars: 150,
        }
    }

    pub const fn for_profile(profile: PromptProfile) -> Self {
        match profile {
            PromptProfile::Enhanced => Self::enhanced(),
            PromptProfile::Streamlined => Self::streamlined(),
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::enhanced()
    }
}

/// Pack `passages` into a single context string.
///
/// Passages are taken in rank order, whitespace-normalized, capped at the
/// per-passage limit, and appended whole while they fit. The first passage
/// that does not fit is truncated into the remaining space if that space
/// exceeds `min_tail_chars`; packing stops there either way.
pub fn optimize(passages: &[RetrievedPassage], budget: &ContextBudget) -> String {
    let mut ordered: Vec<&RetrievedPassage> = passages.iter().collect();
    ordered.sort_by_key(|p| p.rank);

    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    for passage in ordered {
        let normalized = normalize_whitespace(&passage.text);
        if normalized.is_empty() {
            continue;
        }
        let text = cut(&normalized, budget.max_passage_chars);
        let separator = if parts.is_empty() { 0 } else { SEPARATOR.len() };
        let len = text.chars().count();

        if used + separator + len <= budget.max_total_chars {
            used += separator + len;
            parts.push(text);
            continue;
        }

        let remaining = budget.max_total_chars.saturating_sub(used + separator);
        if remaining > budget.min_tail_chars {
            parts.push(cut(&normalized, remaining.min(budget.max_passage_chars)));
        }
        break;
    }

    if parts.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }
    parts.join(SEPARATOR)
}

/// Collapse whitespace inside each line and squeeze blank-line runs to one.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() && lines.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Shorten `text` to at most `limit` characters.
///
/// Cuts after the last sentence terminator when it falls at or past 70 % of
/// the limit, otherwise at the character boundary with an ellipsis.
fn cut(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let prefix: String = text.chars().take(limit).collect();
    if let Some((idx, _)) = prefix
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .last()
    {
        let end_chars = prefix[..idx].chars().count() + 1;
        if end_chars as f64 >= limit as f64 * SENTENCE_CUT_RATIO {
            return prefix[..=idx].to_string();
        }
    }

    if limit <= ELLIPSIS.len() {
        return prefix;
    }
    let head: String = text.chars().take(limit - ELLIPSIS.len()).collect();
    format!("{}{ELLIPSIS}", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(text: &str, rank: usize) -> RetrievedPassage {
        RetrievedPassage::new(text, rank)
    }

    fn small_budget() -> ContextBudget {
        ContextBudget {
            max_total_chars: 300,
            max_passage_chars: 200,
            min_tail_chars: 50,
        }
    }

    #[test]
    fn empty_input_returns_sentinel() {
        assert_eq!(optimize(&[], &ContextBudget::enhanced()), NO_CONTEXT_SENTINEL);
    }

    #[test]
    fn blank_passages_return_sentinel() {
        let passages = vec![passage("   \n\n  ", 0)];
        assert_eq!(optimize(&passages, &ContextBudget::enhanced()), NO_CONTEXT_SENTINEL);
    }

    #[test]
    fn passages_within_budget_are_joined_in_rank_order() {
        let passages = vec![passage("Second.", 1), passage("First.", 0)];
        assert_eq!(optimize(&passages, &ContextBudget::enhanced()), "First.\n\nSecond.");
    }

    #[test]
    fn whitespace_is_normalized() {
        let passages = vec![passage("  Vacation   policy:\n\n\n\n15 \t days  per year. \n\n", 0)];
        assert_eq!(
            optimize(&passages, &ContextBudget::enhanced()),
            "Vacation policy:\n\n15 days per year."
        );
    }

    #[test]
    fn output_never_exceeds_budget() {
        let passages: Vec<_> = (0..10).map(|i| passage(&"word ".repeat(100), i)).collect();
        for budget in [small_budget(), ContextBudget::enhanced(), ContextBudget::streamlined()] {
            let context = optimize(&passages, &budget);
            assert!(context.chars().count() <= budget.max_total_chars);
        }
    }

    #[test]
    fn lowest_ranked_passages_are_dropped_first() {
        let passages = vec![
            passage(&"c".repeat(120), 2),
            passage(&"a".repeat(120), 0),
            passage(&"b".repeat(120), 1),
        ];
        let context = optimize(&passages, &ContextBudget {
            max_total_chars: 250,
            max_passage_chars: 200,
            min_tail_chars: 50,
        });
        assert!(context.starts_with(&"a".repeat(120)));
        assert!(context.contains(&"b".repeat(120)));
        assert!(!context.contains('c'));
    }

    #[test]
    fn tail_passage_is_truncated_when_space_remains() {
        let passages = vec![passage(&"a".repeat(100), 0), passage(&"b".repeat(400), 1)];
        let context = optimize(&passages, &small_budget());

        assert_eq!(context.chars().count(), 300);
        assert!(context.ends_with("..."));
        assert!(context.starts_with(&format!("{}\n\nbbb", "a".repeat(100))));
    }

    #[test]
    fn tail_passage_is_dropped_when_space_is_small() {
        let passages = vec![passage(&"a".repeat(200), 0), passage(&"b".repeat(200), 1)];
        let context = optimize(&passages, &ContextBudget {
            max_total_chars: 240,
            max_passage_chars: 200,
            min_tail_chars: 50,
        });
        assert_eq!(context, "a".repeat(200));
    }

    #[test]
    fn per_passage_cap_applies() {
        let passages = vec![passage(&"x".repeat(1000), 0)];
        let context = optimize(&passages, &ContextBudget::streamlined());
        assert_eq!(context.chars().count(), 600);
    }

    #[test]
    fn cut_prefers_late_sentence_boundary() {
        let text = format!("{}. tail that keeps going on and on", "a".repeat(80));
        assert_eq!(cut(&text, 100), format!("{}.", "a".repeat(80)));
    }

    #[test]
    fn cut_ignores_early_sentence_boundary() {
        let text = format!("Short. {}", "b".repeat(200));
        let out = cut(&text, 100);
        assert_eq!(out.chars().count(), 100);
        assert!(out.ends_with("..."));
        assert!(out.starts_with("Short. bbb"));
    }

    #[test]
    fn cut_handles_multibyte_text() {
        let text = "é".repeat(50);
        assert_eq!(cut(&text, 20).chars().count(), 20);
    }

    #[test]
    fn profiles_map_to_budgets() {
        assert_eq!(ContextBudget::for_profile(PromptProfile::Enhanced), ContextBudget::enhanced());
        assert_eq!(
            ContextBudget::for_profile(PromptProfile::Streamlined).max_passage_chars,
            600
        );
    }

    #[test]
    fn deterministic() {
        let passages = vec![passage("One. Two.", 1), passage("Zero.", 0)];
        assert_eq!(
            optimize(&passages, &small_budget()),
            optimize(&passages, &small_budget())
        );
    }
}
