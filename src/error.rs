//! Error types for the edgequake-pdfchat library.
//!
//! Three error types mirror the three ways things go wrong:
//!
//! * [`ChatError`]: **fatal** for the operation that returned it: the answer
//!   pipeline cannot proceed (no provider, embedding failed, index unreadable,
//!   PDF unreadable).
//!
//! * [`PageError`]: **non-fatal**: one page failed to draw. The scheduler
//!   parks that page in `Failed` and every other page keeps working. It is
//!   `Clone` because every caller awaiting the same in-flight render receives
//!   its own copy of the outcome.
//!
//! * [`ViewerError`]: a navigation request was rejected (page outside the
//!   document) or the requested page failed to draw.
//!
//! Citation parsing and outline resolution have no error type at all: an
//! ambiguous citation is dropped and an unresolvable bookmark becomes inert.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors from the answer pipeline and the PDF/index loaders.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error on every attempt.
    #[error("LLM API error after {retries} retries: {message}")]
    LlmApiError { message: String, retries: u32 },

    /// The embedding provider failed to embed the question.
    #[error("Failed to embed question: {0}")]
    EmbeddingFailed(String),

    /// The question embedding does not have the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The chunk index file could not be read or parsed.
    #[error("Failed to load embedding index '{path}': {detail}")]
    IndexLoadFailed { path: PathBuf, detail: String },

    /// pdfium could not open the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// No pdfium library could be bound.
    #[error("pdfium library not available: {detail}\nSet PDFIUM_LIB_PATH to a pdfium shared library.")]
    PdfiumUnavailable { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page draw.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The draw routine rejected (or panicked) for this page.
    #[error("Page {page}: draw failed: {detail}")]
    DrawFailed { page: u32, detail: String },
}

impl PageError {
    /// Page number the failure belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::DrawFailed { page, .. } => *page,
        }
    }
}

/// Errors returned by the viewer's navigation entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewerError {
    /// Requested page is outside `1..=total`.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: u32 },

    /// The page was scrolled to but its draw failed.
    #[error(transparent)]
    Render(#[from] PageError),
}

/// A citation pattern descriptor could not be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The regular expression is invalid.
    #[error("Citation pattern '{name}' is not a valid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// The regular expression has no `(?P<page>...)` group to extract from.
    #[error("Citation pattern '{name}' has no named 'page' capture group")]
    MissingPageGroup { name: String },
}
