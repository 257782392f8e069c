//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for vector serialization, dimension checks,
//! and similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `tutor-rag`
//! app crate.

use async_trait::async_trait;

/// Trait for embedding providers.
///
/// A provider has a fixed output dimension for the lifetime of the process.
/// Callers check every returned vector against [`dims`](EmbeddingProvider::dims)
/// before storing or querying with it.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one<P: EmbeddingProvider + ?Sized>(
    provider: &P,
    text: &str,
) -> anyhow::Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// A vector whose length differs from the model dimension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("embedding has {actual} dimensions, expected {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Reject vectors that do not have exactly `expected` components.
pub fn check_dims(vector: &[f32], expected: usize) -> Result<(), DimensionMismatch> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use tutor_rag_core::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` when either vector is
/// empty or has zero magnitude, and for vectors of different lengths, so
/// the division is never by zero.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
