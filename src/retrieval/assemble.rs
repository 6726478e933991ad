//! Context assembly: ranked chunks → one budget-bounded string.
//!
//! The chunk that would overflow the budget is not dropped: it is cut at the
//! boundary and closed with a truncation marker, so the model still sees the
//! beginning of the best partial match. The output never exceeds the budget,
//! whatever the input sizes.

use super::rank::{RetrievedContext, ScoredChunk};
use crate::config::{ChatConfig, DEFAULT_CHUNK_SEPARATOR};
use tracing::debug;

/// Marker appended to a chunk cut at the budget boundary.
pub const TRUNCATION_MARKER: &str = "…";

/// Concatenates ranked chunks under a character budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextAssembler {
    separator: String,
    marker: String,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SEPARATOR)
    }
}

impl ContextAssembler {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            marker: TRUNCATION_MARKER.to_string(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.chunk_separator.clone())
    }

    /// Replace the truncation marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Concatenate chunk texts in ranked order, at most `budget_chars` long.
    ///
    /// Chunks are never reordered or deduplicated.
    pub fn assemble(&self, context: &RetrievedContext, budget_chars: usize) -> String {
        let plan = self.plan(&context.chunks, budget_chars);
        let mut out = String::with_capacity(plan.total_chars * 4);

        for (i, scored) in context.chunks.iter().take(plan.full).enumerate() {
            if i > 0 {
                out.push_str(&self.separator);
            }
            out.push_str(&scored.chunk.text);
        }

        if let Some(keep) = plan.cut {
            let scored = &context.chunks[plan.full];
            if plan.full > 0 {
                out.push_str(&self.separator);
            }
            out.extend(scored.chunk.text.chars().take(keep));
            out.push_str(&self.marker);
            debug!(
                "Context cut inside chunk {} ({} of {} chars kept)",
                scored.chunk.index,
                keep,
                scored.chunk.char_len()
            );
        }

        out
    }

    /// Number of characters [`Self::assemble`] would produce.
    pub fn assembled_len(&self, chunks: &[ScoredChunk], budget_chars: usize) -> usize {
        self.plan(chunks, budget_chars).total_chars
    }

    fn plan(&self, chunks: &[ScoredChunk], budget: usize) -> Plan {
        let sep_len = self.separator.chars().count();
        let marker_len = self.marker.chars().count();
        let mut plan = Plan::default();

        for (i, scored) in chunks.iter().enumerate() {
            let sep = if i == 0 { 0 } else { sep_len };
            let len = scored.chunk.char_len();
            if plan.total_chars + sep + len <= budget {
                plan.total_chars += sep + len;
                plan.full += 1;
                continue;
            }

            // At least one character of text must survive next to the marker.
            let room = budget - plan.total_chars;
            if room > sep + marker_len {
                plan.cut = Some(room - sep - marker_len);
                plan.total_chars = budget;
            }
            break;
        }

        plan
    }
}

/// How many chunks fit whole, and how much of the next one survives.
#[derive(Debug, Default)]
struct Plan {
    full: usize,
    cut: Option<usize>,
    total_chars: usize,
}
