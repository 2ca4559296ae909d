//! Maximal Marginal Relevance selection.
//!
//! Each step picks the unselected candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
//! `lambda = 1` keeps relevance order; `lambda = 0` spreads picks across the pool.

/// Cosine similarity of two vectors; zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Candidate considered by [`select`].
pub trait MmrCandidate {
    /// Relevance of the candidate to the query.
    fn relevance(&self) -> f32;
    /// Stored embedding of the candidate.
    fn vector(&self) -> &[f32];
}

/// Greedily select up to `k` candidates.
///
/// `candidates` must be sorted by descending relevance; ties keep the earlier candidate, so the
/// first pick is always the most relevant one.
pub fn select<C: MmrCandidate>(candidates: Vec<C>, k: usize, lambda: f32) -> Vec<C> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    let lambda = lambda.clamp(0.0, 1.0);
    let k = k.min(candidates.len());

    let mut selected: Vec<C> = Vec::with_capacity(k);
    let mut remaining = candidates;

    while selected.len() < k && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (index, candidate) in remaining.iter().enumerate() {
            let score = if selected.is_empty() {
                candidate.relevance()
            } else {
                let redundancy = selected
                    .iter()
                    .map(|chosen| cosine_similarity(candidate.vector(), chosen.vector()))
                    .fold(f32::NEG_INFINITY, f32::max);
                lambda * candidate.relevance() - (1.0 - lambda) * redundancy
            };
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
        selected.push(remaining.remove(best_index));
    }

    selected
}
