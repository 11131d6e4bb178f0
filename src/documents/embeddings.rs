//! Embedding Engine
//!
//! Batches text through an embedding backend, L2-normalizes every row and
//! validates the result. Retrieval scores are plain dot products, so a row
//! that is not unit length would silently corrupt ranking; any malformed
//! output is therefore a hard error rather than something to patch up.

use thiserror::Error;
use tracing::debug;

/// Allowed deviation of a normalized row's L2 norm from 1.0
pub const NORM_TOLERANCE: f64 = 1e-6;

/// Dimensionality of the default sentence embedding model
pub const DEFAULT_DIMENSION: usize = 768;

/// Embedding vector
pub type Embedding = Vec<f32>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding validation failed: {0}")]
    Validation(String),
    #[error("Invalid embedding configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Embedding backend failed: {0}")]
    Backend(String),
}

/// A source of raw (not necessarily normalized) embeddings.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside persisted vectors
    fn model_name(&self) -> &str;

    /// Width of every vector the backend returns
    fn dimension(&self) -> usize;

    /// Embed one batch, returning one vector per input in input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError>;
}

/// Batching, normalizing and validating front end over an [`Embedder`].
///
/// Construction is where model cost is paid; `embed` calls are cheap to
/// issue repeatedly and never change engine state.
pub struct EmbeddingEngine {
    backend: Box<dyn Embedder>,
    dimension: usize,
}

impl EmbeddingEngine {
    pub fn new(backend: Box<dyn Embedder>) -> Self {
        let dimension = backend.dimension();
        Self { backend, dimension }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `texts` in batches of `batch_size`.
    ///
    /// Output row `i` always corresponds to `texts[i]`; the batch size is not
    /// observable in the result.
    pub fn embed(
        &self,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Embedding>, EmbeddingError> {
        if batch_size == 0 {
            return Err(EmbeddingError::InvalidConfiguration(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        let mut output = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let raw = self.backend.embed_batch(batch)?;
            if raw.len() != batch.len() {
                return Err(EmbeddingError::Validation(format!(
                    "backend returned {} vectors for {} inputs",
                    raw.len(),
                    batch.len()
                )));
            }

            for (offset, vector) in raw.into_iter().enumerate() {
                let row = batch_index * batch_size + offset;
                output.push(self.normalize_row(vector, row)?);
            }
            debug!(batch = batch_index, size = batch.len(), "Embedded batch");
        }

        Ok(output)
    }

    /// Embed a single text (batch size 1).
    pub fn embed_one(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed(&[text], 1)?
            .pop()
            .ok_or_else(|| EmbeddingError::Validation("no vector returned for query".to_string()))
    }

    fn normalize_row(
        &self,
        mut vector: Embedding,
        row: usize,
    ) -> Result<Embedding, EmbeddingError> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::Validation(format!(
                "row {} has dimension {}, expected {}",
                row,
                vector.len(),
                self.dimension
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::Validation(format!(
                "row {} contains NaN or infinite values",
                row
            )));
        }

        let norm = l2_norm(&vector);
        if !norm.is_finite() || norm == 0.0 {
            return Err(EmbeddingError::Validation(format!(
                "row {} cannot be normalized (norm {})",
                row, norm
            )));
        }
        for x in &mut vector {
            *x = (*x as f64 / norm) as f32;
        }

        let normalized = l2_norm(&vector);
        if (normalized - 1.0).abs() >= NORM_TOLERANCE {
            return Err(EmbeddingError::Validation(format!(
                "row {} has norm {} after normalization",
                row, normalized
            )));
        }

        Ok(vector)
    }
}

/// L2 norm, accumulated in f64
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Dot product of two equal-length vectors, accumulated in f64.
///
/// For unit vectors this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum::<f64>() as f32
}

/// Offline embedder based on feature hashing.
///
/// Each lowercased word is hashed to a bucket in `[0, dimension)`, producing
/// a term-frequency vector. Stable across runs and platforms: the same text
/// always maps to the same vector. Useful for tests and for building an
/// index without a model server; it captures vocabulary overlap only.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InvalidConfiguration(
                "dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            model_name: format!("feature-hash-{}", dimension),
        })
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dimension as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimension];
        let mut seen_any = false;

        for token in text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
        {
            tf[self.bucket(&token.to_lowercase())] += 1.0;
            seen_any = true;
        }

        // Texts without words still get a well-defined direction
        if !seen_any {
            tf[self.bucket("")] = 1.0;
        }

        tf
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Backend that returns canned vectors, for exercising validation.
    pub(crate) struct FixedEmbedder {
        pub dimension: usize,
        pub vectors: Vec<Embedding>,
    }

    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
            Ok(self.vectors.iter().take(texts.len()).cloned().collect())
        }
    }

    fn hashing_engine(dimension: usize) -> EmbeddingEngine {
        EmbeddingEngine::new(Box::new(HashingEmbedder::new(dimension).unwrap()))
    }

    #[test]
    fn test_generate_embedding() {
        let engine = hashing_engine(DEFAULT_DIMENSION);
        let embedding = engine.embed_one("Hello world this is a test").unwrap();
        assert_eq!(embedding.len(), DEFAULT_DIMENSION);
    }

    #[test]
    fn test_normalization_invariant() {
        let engine = hashing_engine(256);
        let texts = [
            "Total revenues were $96.8 billion",
            "",
            "!!! ???",
            "Risk factors related to our supply chain",
            "a a a a a a a a a a a a a a a a a a a a a a a",
        ];
        for vector in engine.embed(&texts, 2).unwrap() {
            assert!((l2_norm(&vector) - 1.0).abs() < NORM_TOLERANCE);
        }
    }

    #[test]
    fn test_self_similarity() {
        let engine = hashing_engine(DEFAULT_DIMENSION);
        let a = engine.embed_one("The quick brown fox").unwrap();
        let _ = engine.embed_one("completely different words zebra giraffe quantum");
        let b = engine.embed_one("The quick brown fox").unwrap();
        assert_eq!(a, b);
        assert!((dot(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batch_size_not_observable() {
        let engine = hashing_engine(64);
        let texts: Vec<String> = (0..11)
            .map(|i| format!("filing section {} text {}", i, i * 7))
            .collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();

        let one = engine.embed(&refs, 1).unwrap();
        let three = engine.embed(&refs, 3).unwrap();
        let all = engine.embed(&refs, 100).unwrap();
        assert_eq!(one.len(), refs.len());
        assert_eq!(one, three);
        assert_eq!(one, all);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let engine = hashing_engine(8);
        let err = engine.embed(&["x"], 0).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_empty_input() {
        let engine = hashing_engine(8);
        assert!(engine.embed(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn test_nan_rejected() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 3,
            vectors: vec![vec![1.0, f32::NAN, 0.0]],
        }));
        let err = engine.embed(&["x"], 1).unwrap_err();
        assert!(matches!(err, EmbeddingError::Validation(_)));
    }

    #[test]
    fn test_infinite_rejected() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 2,
            vectors: vec![vec![f32::INFINITY, 0.0]],
        }));
        assert!(matches!(engine.embed(&["x"], 1), Err(EmbeddingError::Validation(_))));
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 2,
            vectors: vec![vec![1.0, 0.0]],
        }));
        let err = engine.embed(&["a", "b"], 2).unwrap_err();
        assert!(matches!(err, EmbeddingError::Validation(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 3,
            vectors: vec![vec![1.0, 0.0]],
        }));
        assert!(matches!(engine.embed(&["a"], 1), Err(EmbeddingError::Validation(_))));
    }

    #[test]
    fn test_zero_vector_rejected() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 2,
            vectors: vec![vec![0.0, 0.0]],
        }));
        assert!(matches!(engine.embed(&["a"], 1), Err(EmbeddingError::Validation(_))));
    }

    #[test]
    fn test_unnormalized_backend_output_is_normalized() {
        let engine = EmbeddingEngine::new(Box::new(FixedEmbedder {
            dimension: 2,
            vectors: vec![vec![3.0, 4.0]],
        }));
        let v = engine.embed_one("a").unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_dot_orthogonal() {
        assert!(dot(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((dot(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
