//! Page citations in generated answers.
//!
//! The model is asked to cite pages, and it does so in whatever form its
//! training and the conversation locale suggest: `【3】`, `(page 3)`,
//! `(Seite 3)`, `（第3页）`, or just `(3)`. This module turns those into
//! clickable [`CitationToken`]s without touching the surrounding text.
//!
//! 1. [`pattern`]:  declarative descriptors, one per citation format,
//!    collected in a priority-ordered [`PatternRegistry`]
//! 2. [`tokenize`]: one pass over the answer producing non-overlapping tokens
//!    interleaved with the untouched text

pub mod pattern;
pub mod tokenize;

pub use pattern::{default_registry, CitationPattern, CitationStyle, PatternRegistry, PatternRegistryBuilder};
pub use tokenize::{CitationToken, CitationTokenizer, Segment};
