//! Retrieval: pick the chunks that ground an answer and pack them into a
//! prompt-sized context string.
//!
//! ## Data Flow
//!
//! ```text
//! question embedding ──▶ rank ──▶ RetrievedContext ──▶ assemble ──▶ context string
//!                      (cosine)   (top-k, budgeted)   (separator, hard cut)
//! ```
//!
//! 1. [`index`]:    the per-document chunk store, loaded from the ingestion
//!    step's JSON output
//! 2. [`rank`]:     cosine similarity, deterministic tie-break by chunk index
//! 3. [`assemble`]: budget-bounded concatenation
//!
//! Both stages are synchronous, CPU-only and never suspend.

pub mod assemble;
pub mod index;
pub mod rank;

pub use assemble::ContextAssembler;
pub use index::{DocumentChunk, EmbeddingIndex};
pub use rank::{cosine_similarity, RetrievedContext, ScoredChunk, SimilarityRanker};
