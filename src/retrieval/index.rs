//! Per-document chunk store.
//!
//! Chunks are produced at ingestion time, outside this crate, and arrive here
//! as a JSON array. Order matters: a chunk's position in the array is its
//! position in the source document and is what breaks score ties.

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// A slice of the document's text and its embedding. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Position of the chunk in the source document.
    pub index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn new(index: usize, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            index,
            text: text.into(),
            embedding,
        }
    }

    /// Length of the chunk text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Ordered chunks of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingIndex {
    chunks: Vec<DocumentChunk>,
}

impl EmbeddingIndex {
    /// Build an index from chunks already in document order.
    pub fn new(chunks: Vec<DocumentChunk>) -> Self {
        Self { chunks }
    }

    /// Build an index from `(text, embedding)` pairs, numbering them in order.
    pub fn from_embeddings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let chunks = items
            .into_iter()
            .enumerate()
            .map(|(i, (text, embedding))| DocumentChunk::new(i, text, embedding))
            .collect();
        Self { chunks }
    }

    /// Load a JSON array of [`DocumentChunk`]s.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ChatError::IndexLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let index = Self::from_json_str(&raw).map_err(|e| ChatError::IndexLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        debug!("Loaded {} chunks from {}", index.len(), path.display());
        Ok(index)
    }

    /// Parse a JSON array of [`DocumentChunk`]s.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let index: Self = serde_json::from_str(json)?;
        if let Some(dim) = index.dimension() {
            let ragged = index
                .chunks
                .iter()
                .filter(|c| c.embedding.len() != dim)
                .count();
            if ragged > 0 {
                warn!("{ragged} chunks do not have the index dimension {dim}");
            }
        }
        Ok(index)
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embedding length of the first chunk, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.chunks.first().map(|c| c.embedding.len())
    }
}

impl FromIterator<DocumentChunk> for EmbeddingIndex {
    fn from_iter<T: IntoIterator<Item = DocumentChunk>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
