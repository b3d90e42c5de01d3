//! Embedding seam — the injected similarity function and its cost-aware
//! variant.
//!
//! The core never talks to an embedding service directly. Callers inject an
//! [`Embedder`]; the accounted form threads the cost accumulator through so
//! embedding spend is attributed to the run that incurred it. Failures are
//! opaque to the core: every similarity-based rule downgrades to its mode
//! fallback instead of aborting the run.

use crate::cost::CostAccumulator;

/// Dense embedding vector.
pub type Embedding = Vec<f32>;

/// Opaque embedding failure. The core only ever logs it and falls back.
#[derive(Debug, Clone, thiserror::Error)]
#[error("embedding failed: {0}")]
pub struct EmbeddingError(pub String);

/// Result type for embedding operations.
pub type EmbedResult = Result<Embedding, EmbeddingError>;

/// Injected embedding function.
///
/// Synchronous from the caller's perspective; implementations that reach a
/// network service are expected to block internally.
pub trait Embedder: Send + Sync {
    /// Embed one text. Used when no cost accounting is requested.
    fn embed(&self, text: &str) -> EmbedResult;

    /// Embed one text, recording any incurred cost into the accumulator.
    ///
    /// The default forwards to [`Embedder::embed`] without recording
    /// anything; accounting implementations override this and append one
    /// entry per call.
    fn embed_accounted(&self, text: &str, acc: CostAccumulator) -> (EmbedResult, CostAccumulator) {
        (self.embed(text), acc)
    }
}

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Mismatched lengths and zero vectors yield 0.0 rather than an error: a
/// degenerate embedding should read as "not similar", not abort a merge.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
