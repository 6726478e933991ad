//! # edgequake-pdfchat
//!
//! Chat with a PDF: retrieve the passages that ground an answer, turn the
//! page citations in the answer into clickable tokens, and drive a lazily
//! rendering page viewer to the cited page.
//!
//! ## Why this crate?
//!
//! An answer that says "see 【12】" is only useful if clicking it lands on
//! page 12, drawn, with the outline and page indicator following along. The
//! pieces that make that work (ranking, budgeted context, multi-locale
//! citation parsing, outline resolution, render-once page scheduling) are
//! small but easy to get subtly wrong, so they live here behind narrow
//! traits and are tested in isolation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! question
//!  │
//!  ├─ 1. Rank      cosine similarity over chunk embeddings, top-k
//!  ├─ 2. Assemble  budget-bounded context string
//!  ├─ 3. Answer    LLM chat with a grounded system prompt (retry + backoff)
//!  ├─ 4. Tokenize  answer text → text segments + citation tokens
//!  └─ 5. Navigate  click → scroll + render-once page scheduler
//!
//! document load ─▶ outline resolution ─▶ navigable bookmark tree
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfchat::{ask, ChatConfig, EmbeddingIndex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let index = EmbeddingIndex::from_json_file("chunks.json")?;
//!     let answer = ask("What was the 2023 revenue?", &index, &ChatConfig::default()).await?;
//!     println!("{}", answer.text);
//!     eprintln!("cited pages: {:?}", answer.cited_pages());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfchat` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod answer;
pub mod citation;
pub mod config;
pub mod error;
pub mod outline;
pub mod pdf;
pub mod progress;
pub mod prompts;
pub mod retrieval;
pub mod viewer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use answer::{answer_with_embedding, ask, prepare_prompt, Answer, ContextQuality, PreparedPrompt};
pub use citation::{CitationStyle, CitationToken, CitationTokenizer, PatternRegistry, Segment};
pub use config::{AnswerQuality, ChatConfig, ChatConfigBuilder, PageSelection, ViewerConfig};
pub use error::{ChatError, PageError, PatternError, ViewerError};
pub use outline::{DestinationLookup, OutlineNode, OutlineResolver, RawOutlineNode};
pub use pdf::{PdfPageLookup, PdfiumCanvas};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use retrieval::{
    ContextAssembler, DocumentChunk, EmbeddingIndex, RetrievedContext, ScoredChunk, SimilarityRanker,
};
pub use viewer::{
    NavigationCoordinator, PageCanvas, PageRenderScheduler, PageRenderState, PageVisibility,
    RenderStatus, ViewerCursor, Viewport,
};
