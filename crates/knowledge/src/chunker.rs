//! Overlapping character chunking.
//!
//! Windows are measured in characters. When a window would cut mid-text it
//! is pulled back to the latest paragraph, line, sentence or word boundary
//! in its second half.

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split `text` into chunks of at most `chunk_size` characters, each
/// starting `chunk_overlap` characters before the previous one ended.
///
/// Chunks are trimmed; whitespace-only chunks are dropped.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end < chars.len() {
            preferred_break(&chars[start..hard_end]).map_or(hard_end, |b| start + b)
        } else {
            hard_end
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Offset just past the best separator in the second half of `window`.
fn preferred_break(window: &[char]) -> Option<usize> {
    let min = window.len() / 2;
    SEPARATORS.iter().find_map(|sep| {
        let sep: Vec<char> = sep.chars().collect();
        let last = window.len().checked_sub(sep.len())?;
        (min..=last)
            .rev()
            .find(|&i| window[i..i + sep.len()] == sep[..])
            .map(|i| i + sep.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(n: usize) -> String {
        (0..n).map(|i| format!("w{i:03}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_text("  A single short paragraph.  ", 500, 50);
        assert_eq!(chunks, vec!["A single short paragraph.".to_string()]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_text("", 500, 50).is_empty());
        assert!(split_text("   \n\n  ", 500, 50).is_empty());
    }

    #[test]
    fn chunks_respect_size() {
        let text = numbered_words(300);
        for chunk in split_text(&text, 100, 20) {
            assert!(chunk.chars().count() <= 100, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = numbered_words(100);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);

        let last_word = chunks[0].split_whitespace().last().unwrap();
        assert!(chunks[1].contains(last_word));
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let first = "a".repeat(70);
        let second = "b".repeat(70);
        let text = format!("{first}\n\n{second}");

        let chunks = split_text(&text, 100, 0);
        assert_eq!(chunks[0], first);
        assert_eq!(chunks[1], second);
    }

    #[test]
    fn unbroken_text_cuts_at_size() {
        let text = "x".repeat(250);
        let chunks = split_text(&text, 100, 10);
        assert_eq!(chunks[0].len(), 100);
        assert!(chunks.iter().all(|c| c.len() <= 100));
        // 0..100, 90..190, 180..250
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn multibyte_text_is_not_split_inside_a_char() {
        let text = "héllo wörld ".repeat(40);
        let chunks = split_text(&text, 100, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
    }
}
