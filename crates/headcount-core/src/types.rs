use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default embedding width (FaceNet-512 style recognizers).
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Maximum deviation from 1.0 for a vector to count as unit-norm.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("embedding has zero norm and cannot be normalized")]
    ZeroNorm,
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet512").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// L2-normalize a raw model output so that cosine similarity reduces to a dot product.
    pub fn normalize(raw: &[f32]) -> Result<Self, EmbeddingError> {
        l2_normalize(raw).map(Self::new)
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// True when every value is finite and the L2 norm is within [`UNIT_NORM_TOLERANCE`] of 1.
    pub fn is_unit(&self) -> bool {
        !self.values.is_empty()
            && self.values.iter().all(|v| v.is_finite())
            && (self.norm() - 1.0).abs() <= UNIT_NORM_TOLERANCE
    }

    /// Raw dot product. For two unit vectors this is the cosine similarity.
    pub fn dot(&self, other: &[f32]) -> f32 {
        dot(&self.values, other)
    }

    /// Compute cosine similarity between two embeddings of arbitrary norm.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero when either side has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Scale `raw` to unit L2 norm.
///
/// Zero-norm input is an error rather than a silent NaN vector.
pub fn l2_normalize(raw: &[f32]) -> Result<Vec<f32>, EmbeddingError> {
    if raw.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }

    // Accumulate in f64: 512 squared f32 terms lose precision otherwise.
    let norm = raw
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm <= f64::from(f32::MIN_POSITIVE) {
        return Err(EmbeddingError::ZeroNorm);
    }

    Ok(raw.iter().map(|&x| (f64::from(x) / norm) as f32).collect())
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_normalize_random_vectors_have_unit_norm() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let scale: f32 = rng.gen_range(1e-3..1e3);
            let raw: Vec<f32> = (0..DEFAULT_EMBEDDING_DIM)
                .map(|_| rng.gen_range(-1.0f32..1.0) * scale)
                .collect();
            let e = Embedding::normalize(&raw).unwrap();
            assert!((e.norm() - 1.0).abs() < 1e-5, "norm was {}", e.norm());
            assert!(e.is_unit());
        }
    }

    #[test]
    fn test_normalize_preserves_direction() {
        let e = Embedding::normalize(&[3.0, 4.0]).unwrap();
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_error() {
        assert_eq!(Embedding::normalize(&[0.0; 8]), Err(EmbeddingError::ZeroNorm));
    }

    #[test]
    fn test_normalize_rejects_empty_and_nan() {
        assert_eq!(Embedding::normalize(&[]), Err(EmbeddingError::Empty));
        assert_eq!(
            Embedding::normalize(&[1.0, f32::NAN]),
            Err(EmbeddingError::NonFinite)
        );
    }

    #[test]
    fn test_is_unit_rejects_zero_and_unnormalized() {
        assert!(!Embedding::new(vec![0.0, 0.0]).is_unit());
        assert!(!Embedding::new(vec![2.0, 0.0]).is_unit());
        assert!(!Embedding::new(vec![]).is_unit());
        assert!(Embedding::new(vec![0.0, 1.0]).is_unit());
    }

    #[test]
    fn test_dot_of_unit_vectors_is_cosine() {
        let a = Embedding::normalize(&[1.0, 2.0, 3.0]).unwrap();
        let b = Embedding::normalize(&[2.0, 1.0, 0.5]).unwrap();
        assert!((a.dot(&b.values) - a.similarity(&b)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }
}
