#[cfg(test)]
mod tests;

pub mod ollama;
pub mod pool;

use crate::{Result, SemdexError};

/// Text-to-vector capability, selected at startup via configuration.
///
/// Implementations run on the pool's dedicated worker thread, so they are
/// deliberately synchronous. `OllamaEmbedder` is the production model;
/// `HashEmbedder` is a deterministic stand-in for tests.
pub trait Embedder: Send {
    /// Convert text into a fixed-length vector of `dimensions()` floats.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Process-wide vector dimensionality.
    fn dimensions(&self) -> usize;
}

/// Builds the embedder inside the worker thread on first use, keeping large
/// model runtimes off the main thread entirely. Reused on re-initialization
/// after a worker failure.
pub type EmbedderFactory =
    std::sync::Arc<dyn Fn() -> anyhow::Result<Box<dyn Embedder>> + Send + Sync>;

/// Cosine similarity between two equal-length vectors, in [-1, 1].
///
/// Vectors of differing lengths are not comparable and produce a shape error.
/// A zero vector has similarity 0 with everything.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(SemdexError::Shape(format!(
            "Embedding length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Deterministic embedder for tests: hashes character trigrams into a fixed
/// number of buckets and L2-normalizes. Similar texts land near each other,
/// identical texts map to identical vectors, and no model server is needed.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    #[inline]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Embedder for HashEmbedder {
    #[inline]
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for trigram in chars.windows(3) {
            let mut hash = 0xcbf2_9ce4_8422_2325u64;
            for &ch in trigram {
                hash ^= ch as u64;
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            let bucket = (hash % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        Ok(vector)
    }

    #[inline]
    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
