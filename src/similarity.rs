//! Cosine similarity between fingerprints

/// Cosine similarity of two fingerprints, in `[-1.0, 1.0]`.
///
/// Returns `0.0` when either vector has zero norm, when the lengths differ,
/// or when the inputs contain non-finite values.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0)
}

/// Score one query against many fingerprints, preserving order
pub fn cosine_similarity_batch<V: AsRef<[f32]>>(query: &[f32], fingerprints: &[V]) -> Vec<f64> {
    fingerprints
        .iter()
        .map(|f| cosine_similarity(query, f.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_orthogonal_and_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn self_similarity_is_one_regardless_of_magnitude() {
        let v = [0.3, -1.7, 42.0, 1e-3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);

        let scaled: Vec<f32> = v.iter().map(|x| x * 10.0).collect();
        assert!((cosine_similarity(&v, &scaled) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn dimension_mismatch_scores_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn non_finite_input_scores_zero() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn scores_stay_within_bounds() {
        let vectors: [[f32; 3]; 5] = [
            [1.0, 2.0, 3.0],
            [-3.0, 0.5, 9.0],
            [1e-20, 1e-20, 1e-20],
            [1e20, -1e20, 1e20],
            [0.1, 0.1, 0.1],
        ];
        for a in &vectors {
            for b in &vectors {
                let score = cosine_similarity(a, b);
                assert!((-1.0..=1.0).contains(&score), "{score} out of range");
            }
        }
    }

    #[test]
    fn batch_preserves_order() {
        let scores = cosine_similarity_batch(
            &[1.0, 0.0],
            &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0], vec![1.0]],
        );
        assert_eq!(scores.len(), 4);
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert_eq!(&scores[1..], &[0.0, 0.0, 0.0]);
    }
}
