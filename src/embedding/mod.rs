//! Sentence embeddings and similarity ranking.
//!
//! The [`Embedder`] trait is the narrow seam between grading logic and the
//! sentence encoder. The bundled implementation ([`SbertModel`], behind the
//! `sbert` feature) runs a BERT-family sentence-transformers checkpoint with
//! candle; tests substitute deterministic stubs.

#[cfg(feature = "sbert")]
mod sbert;

#[cfg(feature = "sbert")]
pub use sbert::SbertModel;

use crate::error::{GraderError, Result};
use tracing::debug;

/// A sentence encoder producing unit-norm vectors.
pub trait Embedder {
    /// Embed `sentences`, returning one vector per input in the same order.
    ///
    /// Vectors are L2-normalized, so a dot product between two of them is
    /// their cosine similarity.
    fn embed(&self, sentences: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit length; zero vectors are returned unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Index of the best-scoring entry. Ties go to the earliest entry and NaN
/// scores never win.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let mut best = 0;
    let mut top = f32::NEG_INFINITY;
    for (idx, &score) in scores.iter().enumerate() {
        if score > top {
            best = idx;
            top = score;
        }
    }
    Some(best)
}

/// Return the candidate whose embedding is most similar to `query`.
///
/// Query and candidates go through the embedder in a single batch. Ties are
/// broken by the first occurrence in `candidates`. The returned value is
/// always one of `candidates`.
pub fn rank_by_similarity<'c, E>(
    embedder: &E,
    query: &str,
    candidates: &'c [String],
) -> Result<&'c str>
where
    E: Embedder + ?Sized,
{
    if candidates.is_empty() {
        return Err(GraderError::InvalidInput(
            "rank_by_similarity needs at least one candidate".to_string(),
        ));
    }

    let mut batch: Vec<&str> = Vec::with_capacity(candidates.len() + 1);
    batch.push(query);
    batch.extend(candidates.iter().map(String::as_str));

    let vectors = embedder.embed(&batch)?;
    if vectors.len() != batch.len() {
        return Err(GraderError::Embedding(format!(
            "expected {} embeddings, got {}",
            batch.len(),
            vectors.len()
        )));
    }

    let (query_vec, candidate_vecs) = vectors.split_at(1);
    let scores: Vec<f32> = candidate_vecs
        .iter()
        .map(|c| dot(&query_vec[0], c))
        .collect();

    let best = argmax(&scores).unwrap_or(0);
    debug!(
        query,
        winner = candidates[best].as_str(),
        score = scores[best],
        "Ranked candidates"
    );
    Ok(candidates[best].as_str())
}
