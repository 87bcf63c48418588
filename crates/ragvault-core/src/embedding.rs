//! Embedding provider trait and vector utilities.
//!
//! The engine never produces embeddings itself. Callers that ingest raw
//! text supply an [`Embedder`]; everything else in this module is pure
//! vector math and the BLOB encoding used by persistent stores.

use anyhow::Result as AnyResult;
use async_trait::async_trait;

use crate::error::{EngineError, Result};

/// Trait for embedding providers.
///
/// Implementations live outside this crate (remote APIs, local models,
/// test fakes). `embed` must return exactly one vector per input text,
/// each of length [`dims`](Embedder::dims).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> AnyResult<Vec<Vec<f32>>>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use ragvault_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal, or either vector is zero
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
/// Sums are accumulated in `f64`, so large finite components cannot
/// overflow the norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::from(f32::EPSILON) {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0) as f32
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm > f64::from(f32::EPSILON) {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}

/// Check that `v` has `dims` finite components.
pub fn validate_embedding(v: &[f32], dims: usize) -> Result<()> {
    if v.len() != dims {
        return Err(EngineError::DimensionMismatch {
            expected: dims,
            actual: v.len(),
        });
    }
    if let Some(pos) = v.iter().position(|x| !x.is_finite()) {
        return Err(EngineError::invalid(format!(
            "embedding component {pos} is not a finite number"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_cosine_stays_in_range_for_scaled_vectors() {
        let a = [1e18f32, 1e18];
        let b = [3e18f32, 3e18];
        let sim = cosine_similarity(&a, &b);
        assert!((-1.0..=1.0).contains(&sim));
    }

    #[test]
    fn test_cosine_large_finite_vectors() {
        let big = [1e20f32, 1e20];
        let sim = cosine_similarity(&big, &big);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
        let sim = cosine_similarity(&[1.0, 1.0], &big);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
        let sim = cosine_similarity(&[-3e38f32, 3e38], &[3e38f32, -3e38]);
        assert!((sim + 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        let mut big = vec![3e38f32, 2e38];
        normalize(&mut big);
        assert!(big.iter().all(|x| x.is_finite()));
        let mut z = vec![0.0, 0.0];
        normalize(&mut z);
        assert_eq!(z, vec![0.0, 0.0]);
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[1.0, 2.0], 2).is_ok());
        assert!(matches!(
            validate_embedding(&[1.0], 2),
            Err(EngineError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            validate_embedding(&[1.0, f32::NAN], 2),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
