//! Similarity ranking of document chunks against a question embedding.

use super::assemble::ContextAssembler;
use super::index::{DocumentChunk, EmbeddingIndex};
use crate::config::{ChatConfig, DEFAULT_CONTEXT_BUDGET};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// A chunk paired with its similarity to the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// The chunks selected to ground an answer.
///
/// `chunks` are ordered by descending score, ties by ascending chunk index.
/// `total_chars` is the length the assembled context will have, which never
/// exceeds the budget the ranker was built with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub chunks: Vec<ScoredChunk>,
    pub total_chars: usize,
}

impl RetrievedContext {
    /// True when no chunk was retrieved; callers fall back to ungrounded prompting.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk indices in ranked order.
    pub fn indices(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.chunk.index).collect()
    }
}

/// Cosine similarity; a zero-length vector scores 0 rather than dividing by zero.
///
/// Vectors of different lengths, or containing non-finite values, also score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() || !dot.is_finite() {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Scores every chunk of an index and keeps the best `k`.
#[derive(Debug, Clone)]
pub struct SimilarityRanker {
    assembler: ContextAssembler,
    budget_chars: usize,
}

impl Default for SimilarityRanker {
    fn default() -> Self {
        Self::new(ContextAssembler::default(), DEFAULT_CONTEXT_BUDGET)
    }
}

impl SimilarityRanker {
    /// `assembler` and `budget_chars` determine the reported `total_chars`.
    pub fn new(assembler: ContextAssembler, budget_chars: usize) -> Self {
        Self {
            assembler,
            budget_chars,
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            ContextAssembler::from_config(config),
            config.context_budget_chars,
        )
    }

    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    /// Rank `index` against `query` and keep the top `k` chunks.
    ///
    /// Pure and deterministic: equal scores are ordered by chunk index, so the
    /// same inputs always give the same list. An empty index gives an empty
    /// context.
    pub fn rank(&self, query: &[f32], index: &EmbeddingIndex, k: usize) -> RetrievedContext {
        if index.is_empty() || k == 0 {
            return RetrievedContext::default();
        }

        let mut mismatched = 0usize;
        let mut scored: Vec<ScoredChunk> = index
            .chunks()
            .iter()
            .map(|chunk| {
                if chunk.embedding.len() != query.len() {
                    mismatched += 1;
                }
                ScoredChunk {
                    score: cosine_similarity(query, &chunk.embedding),
                    chunk: chunk.clone(),
                }
            })
            .collect();

        if mismatched > 0 {
            warn!(
                "{} of {} chunks have a different dimension than the query ({}); scored 0",
                mismatched,
                index.len(),
                query.len()
            );
        }

        scored.sort_by(compare_ranked);
        scored.truncate(k);

        let total_chars = self.assembler.assembled_len(&scored, self.budget_chars);
        debug!(
            "Ranked {} chunks, kept {} ({} chars of context)",
            index.len(),
            scored.len(),
            total_chars
        );

        RetrievedContext {
            chunks: scored,
            total_chars,
        }
    }
}

/// Descending score, then ascending chunk index.
fn compare_ranked(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.index.cmp(&b.chunk.index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(vectors: &[&[f32]]) -> EmbeddingIndex {
        EmbeddingIndex::from_embeddings(
            vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("chunk {i}"), v.to_vec())),
        )
    }

    #[test]
    fn cosine_of_identical_direction_is_one() {
        assert!((cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn ranks_by_score_and_keeps_k() {
        let idx = index(&[&[1.0, 0.0], &[0.0, 1.0], &[0.9, 0.1]]);
        let ctx = SimilarityRanker::default().rank(&[1.0, 0.0], &idx, 2);
        assert_eq!(ctx.indices(), vec![0, 2]);
        assert!((ctx.chunks[0].score - 1.0).abs() < 1e-6);
        assert!((ctx.chunks[1].score - 0.9939).abs() < 1e-3);
    }

    #[test]
    fn ties_break_by_ascending_index() {
        let idx = index(&[&[0.0, 1.0], &[1.0, 0.0], &[0.0, 1.0], &[1.0, 0.0]]);
        let ctx = SimilarityRanker::default().rank(&[1.0, 0.0], &idx, 4);
        assert_eq!(ctx.indices(), vec![1, 3, 0, 2]);
    }

    #[test]
    fn ranking_is_deterministic() {
        let idx = index(&[&[0.3, 0.3], &[0.6, 0.6], &[0.1, 0.9], &[0.9, 0.1]]);
        let ranker = SimilarityRanker::default();
        let first = ranker.rank(&[0.5, 0.5], &idx, 3);
        for _ in 0..10 {
            assert_eq!(ranker.rank(&[0.5, 0.5], &idx, 3), first);
        }
    }

    #[test]
    fn empty_index_gives_empty_context() {
        let ctx = SimilarityRanker::default().rank(&[1.0], &EmbeddingIndex::default(), 5);
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_chars, 0);
    }

    #[test]
    fn total_chars_respects_budget() {
        let idx = EmbeddingIndex::from_embeddings(vec![
            ("a".repeat(50), vec![1.0]),
            ("b".repeat(50), vec![1.0]),
        ]);
        let ranker = SimilarityRanker::new(ContextAssembler::new("|"), 60);
        let ctx = ranker.rank(&[1.0], &idx, 2);
        assert_eq!(ctx.chunks.len(), 2);
        assert_eq!(ctx.total_chars, 60);
    }
}
