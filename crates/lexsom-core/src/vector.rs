//! Vector math shared by the grid, the partitioner and retrieval.
//!
//! Norms accumulate in f64 so normalized codebook vectors stay within 1e-6 of unit length
//! even at large dimensionality.

use rand::Rng;

/// L2 norm of `v`.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Scales `v` to unit length. Returns `false` (leaving `v` untouched) when the norm is zero
/// or not finite.
pub fn normalize_in_place(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm <= 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x = (f64::from(*x) / norm) as f32;
    }
    true
}

/// Euclidean distance. Extra trailing components of the longer slice are ignored.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Cosine similarity in `[-1, 1]`; 0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f32
    }
}

/// Draws each component uniformly from `[-1, 1]` and normalizes, resampling the
/// (vanishingly rare) all-zero draw.
pub fn random_unit_vector<R: Rng + ?Sized>(dimensions: usize, rng: &mut R) -> Vec<f32> {
    loop {
        let mut v: Vec<f32> = (0..dimensions).map(|_| rng.gen_range(-1.0f32..=1.0)).collect();
        if normalize_in_place(&mut v) {
            return v;
        }
    }
}

/// Component-wise mean of `vectors`. Zero vector when `vectors` is empty.
pub fn mean_vector(vectors: &[&[f32]], dimensions: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dimensions];
    if vectors.is_empty() {
        return mean;
    }
    for v in vectors {
        for (m, &val) in mean.iter_mut().zip(v.iter()) {
            *m += val;
        }
    }
    let n = vectors.len() as f32;
    for m in &mut mean {
        *m /= n;
    }
    mean
}
