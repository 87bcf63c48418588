//! Spherical k-means for IVF training.
//!
//! Cosine similarity is the metric throughout, so centroids are kept at
//! unit length and "nearest" means "highest cosine similarity".
//! Initialization is k-means++ (seeded by squared cosine distance) and the
//! RNG is seeded by the caller, which makes training reproducible.
//!
//! # Algorithm
//! 1. Pick `k` initial centroids with k-means++.
//! 2. Assign every vector to its most similar centroid.
//! 3. Stop if no assignment changed or `max_iterations` was reached.
//! 4. Recompute each centroid as the normalized mean of its members; an
//!    empty cluster is reseeded from a random input vector.
//! 5. Stop early once mean centroid movement drops below tolerance.

use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::embedding::{cosine_similarity, normalize};

/// Mean cosine distance between successive centroid sets below which
/// training stops.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Below this total weight every point coincides with a chosen centroid.
const EPSILON: f32 = 1e-10;

#[derive(Error, Debug, PartialEq)]
pub enum ClusteringError {
    #[error("cannot cluster an empty vector set")]
    EmptyVectorSet,

    #[error("invalid cluster count {k} for {n} vectors; use 1 <= k <= n")]
    InvalidClusterCount { k: usize, n: usize },

    #[error("vector {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Output of [`kmeans`].
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length centroids, `k` of them.
    pub centroids: Vec<Vec<f32>>,
    /// Cluster index per input vector.
    pub assignments: Vec<usize>,
    /// Iterations actually run.
    pub iterations: usize,
}

/// Cluster `vectors` into `k` groups.
pub fn kmeans(
    vectors: &[&[f32]],
    k: usize,
    max_iterations: usize,
    rng: &mut StdRng,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount {
            k,
            n: vectors.len(),
        });
    }
    let dims = vectors[0].len();
    if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
        return Err(ClusteringError::DimensionMismatch {
            index,
            expected: dims,
            actual: v.len(),
        });
    }

    let mut centroids = kmeans_plus_plus(vectors, k, rng);
    let mut assignments: Vec<usize> = vectors
        .iter()
        .map(|v| nearest_centroid(v, &centroids))
        .collect();
    let mut iterations = 1;

    while iterations < max_iterations.max(1) {
        let updated = update_centroids(vectors, &assignments, k, rng);
        let movement = mean_movement(&centroids, &updated);
        centroids = updated;
        iterations += 1;

        let next: Vec<usize> = vectors
            .iter()
            .map(|v| nearest_centroid(v, &centroids))
            .collect();
        let changed = next != assignments;
        assignments = next;

        if !changed || movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= max_iterations {
        tracing::debug!(iterations, "k-means stopped at the iteration cap");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Index of the centroid most similar to `vector`. Ties go to the lower index.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let sim = cosine_similarity(vector, c);
        if sim > best_sim {
            best_sim = sim;
            best = i;
        }
    }
    best
}

/// Indices of the `p` centroids most similar to `vector`, best first.
pub fn nearest_centroids(vector: &[f32], centroids: &[Vec<f32>], p: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(vector, c)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(p).map(|(i, _)| i).collect()
}

fn unit_copy(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

fn kmeans_plus_plus(vectors: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(unit_copy(vectors[rng.random_range(0..vectors.len())]));

    // Squared distance of each point to its nearest chosen centroid.
    let mut weights: Vec<f32> = vectors
        .iter()
        .map(|v| squared_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = weights.iter().sum();
        let pick = if total < EPSILON {
            // Remaining points all coincide with a centroid already chosen.
            rng.random_range(0..vectors.len())
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            weights
                .iter()
                .position(|w| {
                    cumulative += w;
                    cumulative >= target
                })
                .unwrap_or(vectors.len() - 1)
        };
        let centroid = unit_copy(vectors[pick]);
        for (w, v) in weights.iter_mut().zip(vectors) {
            *w = w.min(squared_distance(v, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn squared_distance(v: &[f32], centroid: &[f32]) -> f32 {
    let d = 1.0 - cosine_similarity(v, centroid);
    d * d
}

fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dims = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dims]; k];
    let mut sizes = vec![0usize; k];

    for (v, &cluster) in vectors.iter().zip(assignments) {
        // Sum unit vectors so long embeddings don't dominate the mean.
        let norm = v
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            .sqrt();
        if norm > f64::from(f32::EPSILON) {
            for (s, &x) in sums[cluster].iter_mut().zip(v.iter()) {
                *s += (f64::from(x) / norm) as f32;
            }
        }
        sizes[cluster] += 1;
    }

    for (centroid, &size) in sums.iter_mut().zip(&sizes) {
        if size == 0 {
            *centroid = unit_copy(vectors[rng.random_range(0..vectors.len())]);
        } else {
            normalize(centroid);
        }
    }

    sums
}

fn mean_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new)
        .map(|(a, b)| 1.0 - cosine_similarity(a, b))
        .sum::<f32>()
        / old.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn two_blobs() -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for i in 0..20 {
            let jitter = i as f32 * 0.001;
            out.push(vec![1.0, jitter, 0.0]);
            out.push(vec![0.0, jitter, 1.0]);
        }
        out
    }

    #[test]
    fn test_separates_two_blobs() {
        let data = two_blobs();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let result = kmeans(&refs, 2, 25, &mut rng()).unwrap();

        assert_eq!(result.centroids.len(), 2);
        let a = result.assignments[0];
        let b = result.assignments[1];
        assert_ne!(a, b);
        for (i, &c) in result.assignments.iter().enumerate() {
            assert_eq!(c, if i % 2 == 0 { a } else { b });
        }
    }

    #[test]
    fn test_centroids_are_unit_length() {
        let data = two_blobs();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let result = kmeans(&refs, 3, 10, &mut rng()).unwrap();
        for c in &result.centroids {
            let norm = c.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let data = two_blobs();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let r1 = kmeans(&refs, 4, 10, &mut rng()).unwrap();
        let r2 = kmeans(&refs, 4, 10, &mut rng()).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_identical_points_fill_all_clusters() {
        let data = vec![vec![1.0, 1.0]; 5];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let result = kmeans(&refs, 3, 10, &mut rng()).unwrap();
        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 5);
    }

    #[test]
    fn test_large_magnitude_vectors_cluster_by_direction() {
        let data: Vec<Vec<f32>> = two_blobs()
            .into_iter()
            .map(|v| v.into_iter().map(|x| x * 1e20).collect())
            .collect();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let result = kmeans(&refs, 2, 25, &mut rng()).unwrap();
        assert_ne!(result.assignments[0], result.assignments[1]);
        for c in &result.centroids {
            assert!(c.iter().all(|x| x.is_finite()));
            let norm = c.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(
            kmeans(&[] as &[&[f32]], 1, 10, &mut rng()).unwrap_err(),
            ClusteringError::EmptyVectorSet
        );
        let a: &[f32] = &[1.0, 0.0];
        let b: &[f32] = &[1.0];
        assert!(matches!(
            kmeans(&[a], 2, 10, &mut rng()),
            Err(ClusteringError::InvalidClusterCount { k: 2, n: 1 })
        ));
        assert!(matches!(
            kmeans(&[a, b], 1, 10, &mut rng()),
            Err(ClusteringError::DimensionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_nearest_centroids_order() {
        let centroids = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        assert_eq!(nearest_centroid(&[0.9, 0.1], &centroids), 0);
        assert_eq!(nearest_centroids(&[0.1, 0.9], &centroids, 2), vec![1, 0]);
        assert_eq!(nearest_centroids(&[0.1, 0.9], &centroids, 10).len(), 3);
    }
}
