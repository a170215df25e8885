use std::cmp::Ordering;

/// Cosine similarity of two equal-length vectors. Zero-norm inputs score 0.
/// Returns `None` when the lengths differ or either vector is empty.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Option<f32> {
    if query.is_empty() || candidate.is_empty() || query.len() != candidate.len() {
        return None;
    }

    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Some(0.0);
    }

    Some(dot / denom)
}

/// Descending order for similarity scores; NaN sorts last.
pub fn cmp_scores_desc(left: f32, right: f32) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
