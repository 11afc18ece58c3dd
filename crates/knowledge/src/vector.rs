//! Vector similarity ranking.

use crate::index::Passage;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (d + x * y, na + x * x, nb + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank passages by cosine similarity to `query_embedding`, best first.
///
/// Passages without an embedding are skipped. The sort is stable, so equal
/// scores keep ingestion order.
pub fn rank_by_similarity<'a>(passages: &'a [Passage], query_embedding: &[f32], limit: usize) -> Vec<&'a Passage> {
    let mut scored: Vec<(f32, &Passage)> = passages
        .iter()
        .filter_map(|p| {
            let emb = p.embedding.as_ref()?;
            Some((cosine_similarity(emb, query_embedding), p))
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.into_iter().map(|(_, p)| p).collect()
}
