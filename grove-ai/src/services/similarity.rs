//! Embedding similarity for semantic deduplication

/// Cosine similarity between two embeddings
///
/// Returns 0.0 when the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}

/// Pick the candidate most similar to `query`
///
/// Candidates whose dimension differs from the query are skipped. Ties keep the
/// first-seen candidate. With `threshold = Some(t)`, a best score below `t` yields
/// `None`; with `None` any dimensionally compatible candidate can win.
pub fn best_match<T>(
    query: &[f32],
    candidates: impl IntoIterator<Item = (T, Vec<f32>)>,
    threshold: Option<f32>,
) -> Option<(T, f32)> {
    if query.is_empty() {
        return None;
    }

    let mut best: Option<(T, f32)> = None;
    for (candidate, vector) in candidates {
        if vector.len() != query.len() {
            continue;
        }
        let score = cosine_similarity(query, &vector);
        match &best {
            Some((_, best_score)) if score <= *best_score => {}
            _ => best = Some((candidate, score)),
        }
    }

    match (best, threshold) {
        (Some((_, score)), Some(floor)) if score < floor => {
            tracing::debug!(score, floor, "Best semantic match below threshold");
            None
        }
        (best, _) => best,
    }
}
