//! Configuration types for retrieval, answering and viewing.
//!
//! All answer-pipeline behaviour is controlled through [`ChatConfig`], built
//! via its [`ChatConfigBuilder`]. Viewer behaviour (zoom bounds) lives in the
//! much smaller [`ViewerConfig`], since a viewer can exist without any LLM
//! provider configured at all.

use crate::error::ChatError;
use edgequake_llm::{EmbeddingProvider, LLMProvider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default character ceiling for the assembled prompt context.
pub const DEFAULT_CONTEXT_BUDGET: usize = 8000;

/// Canonical embedding dimension (`text-embedding-3-small`).
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Separator inserted between chunks in the assembled context.
pub const DEFAULT_CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Upper bound for [`ChatConfigBuilder::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for asking questions about a document.
///
/// Built via [`ChatConfig::builder()`] or using [`ChatConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfchat::{AnswerQuality, ChatConfig};
///
/// let config = ChatConfig::builder()
///     .context_budget_chars(6000)
///     .quality(AnswerQuality::HighQuality)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.top_k(), 10);
/// ```
#[derive(Clone)]
pub struct ChatConfig {
    /// Character ceiling for the assembled context. Default: 8000.
    ///
    /// Counted in Unicode scalar values, separators and the truncation
    /// marker included.
    pub context_budget_chars: usize,

    /// Chunks retrieved in [`AnswerQuality::Fast`] mode. Default: 4.
    pub fast_top_k: usize,

    /// Chunks retrieved in [`AnswerQuality::HighQuality`] mode. Default: 10.
    pub quality_top_k: usize,

    /// Requested answer quality. Default: [`AnswerQuality::Fast`].
    pub quality: AnswerQuality,

    /// Separator between chunks in the assembled context.
    pub chunk_separator: String,

    /// Expected embedding length for chunks and questions. Default: 1536.
    pub embedding_dim: usize,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed chat provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed embedding provider for questions.
    ///
    /// When None, the embedding half of `ProviderFactory::from_env()` is used.
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per answer. Default: 1024.
    pub max_tokens: usize,

    /// Maximum retry attempts on a failing chat call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system prompt. If None, uses the built-in grounded prompt.
    ///
    /// The placeholder `{context}` is replaced with the assembled context.
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: DEFAULT_CONTEXT_BUDGET,
            fast_top_k: 4,
            quality_top_k: 10,
            quality: AnswerQuality::default(),
            chunk_separator: DEFAULT_CHUNK_SEPARATOR.to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            model: None,
            provider_name: None,
            provider: None,
            embedding_provider: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("context_budget_chars", &self.context_budget_chars)
            .field("fast_top_k", &self.fast_top_k)
            .field("quality_top_k", &self.quality_top_k)
            .field("quality", &self.quality)
            .field("embedding_dim", &self.embedding_dim)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "embedding_provider",
                &self
                    .embedding_provider
                    .as_ref()
                    .map(|_| "<dyn EmbeddingProvider>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ChatConfig {
    /// Create a new builder for `ChatConfig`.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of chunks to retrieve for the configured quality.
    pub fn top_k(&self) -> usize {
        self.top_k_for(self.quality)
    }

    /// Number of chunks to retrieve for an explicit quality.
    pub fn top_k_for(&self, quality: AnswerQuality) -> usize {
        match quality {
            AnswerQuality::Fast => self.fast_top_k,
            AnswerQuality::HighQuality => self.quality_top_k,
        }
    }
}

/// Builder for [`ChatConfig`].
#[derive(Debug)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn context_budget_chars(mut self, chars: usize) -> Self {
        self.config.context_budget_chars = chars;
        self
    }

    pub fn fast_top_k(mut self, k: usize) -> Self {
        self.config.fast_top_k = k.max(1);
        self
    }

    pub fn quality_top_k(mut self, k: usize) -> Self {
        self.config.quality_top_k = k.max(1);
        self
    }

    pub fn quality(mut self, quality: AnswerQuality) -> Self {
        self.config.quality = quality;
        self
    }

    pub fn chunk_separator(mut self, sep: impl Into<String>) -> Self {
        self.config.chunk_separator = sep.into();
        self
    }

    pub fn embedding_dim(mut self, dim: usize) -> Self {
        self.config.embedding_dim = dim;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.config.embedding_provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    /// Clamped to [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ChatConfig, ChatError> {
        let c = &self.config;
        if c.embedding_dim == 0 {
            return Err(ChatError::InvalidConfig(
                "Embedding dimension must be ≥ 1".into(),
            ));
        }
        if c.fast_top_k > c.quality_top_k {
            return Err(ChatError::InvalidConfig(format!(
                "fast_top_k ({}) must not exceed quality_top_k ({})",
                c.fast_top_k, c.quality_top_k
            )));
        }
        if let Some(prompt) = &c.system_prompt {
            if !prompt.contains("{context}") {
                return Err(ChatError::InvalidConfig(
                    "Custom system prompt must contain a {context} placeholder".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

/// Viewer settings shared by the render scheduler and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Zoom factor applied before the first `set_scale`. Default: 1.0.
    pub initial_scale: f32,
    /// Smallest accepted zoom factor. Default: 0.25.
    pub min_scale: f32,
    /// Largest accepted zoom factor. Default: 4.0.
    pub max_scale: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            initial_scale: 1.0,
            min_scale: 0.25,
            max_scale: 4.0,
        }
    }
}

impl ViewerConfig {
    /// Clamp a requested zoom factor into the configured range.
    ///
    /// Non-finite input falls back to `initial_scale`.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        if scale.is_finite() {
            scale.clamp(self.min_scale, self.max_scale)
        } else {
            self.initial_scale.clamp(self.min_scale, self.max_scale)
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Requested answer quality: trades retrieved context for latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnswerQuality {
    /// Fewer chunks, shorter prompt, lower latency. (default)
    #[default]
    Fast,
    /// More chunks for better grounding.
    HighQuality,
}

/// Specifies which pages of the PDF to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(u32),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(u32, u32),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<u32>),
}

impl PageSelection {
    /// Expand the selection into sorted, deduplicated 1-based page numbers.
    pub fn to_pages(&self, total_pages: u32) -> Vec<u32> {
        let in_range = |p: u32| p >= 1 && p <= total_pages;
        let mut pages: Vec<u32> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if in_range(*p) {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(pages) => pages.iter().copied().filter(|&p| in_range(p)).collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ChatConfig::default();
        assert_eq!(c.context_budget_chars, 8000);
        assert_eq!(c.embedding_dim, 1536);
        assert_eq!(c.top_k(), 4);
        assert_eq!(c.top_k_for(AnswerQuality::HighQuality), 10);
    }

    #[test]
    fn builder_rejects_prompt_without_placeholder() {
        let err = ChatConfig::builder()
            .system_prompt("Answer briefly.")
            .build()
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_inverted_top_k() {
        let err = ChatConfig::builder()
            .fast_top_k(12)
            .quality_top_k(5)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("fast_top_k"));
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = ChatConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_clamps_retries() {
        let c = ChatConfig::builder().max_retries(500).build().unwrap();
        assert_eq!(c.max_retries, MAX_RETRIES);
    }

    #[test]
    fn debug_hides_provider_handles() {
        let dbg = format!("{:?}", ChatConfig::default());
        assert!(dbg.contains("context_budget_chars"));
        assert!(dbg.contains("provider: None"));
    }

    #[test]
    fn viewer_scale_is_clamped() {
        let v = ViewerConfig::default();
        assert_eq!(v.clamp_scale(10.0), 4.0);
        assert_eq!(v.clamp_scale(0.01), 0.25);
        assert_eq!(v.clamp_scale(f32::NAN), 1.0);
        assert_eq!(v.clamp_scale(1.5), 1.5);
    }

    #[test]
    fn page_selection_expands_one_based() {
        assert_eq!(PageSelection::All.to_pages(3), vec![1, 2, 3]);
        assert_eq!(PageSelection::Single(4).to_pages(3), Vec::<u32>::new());
        assert_eq!(PageSelection::Range(2, 9).to_pages(4), vec![2, 3, 4]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3, 0, 8]).to_pages(5),
            vec![1, 3]
        );
    }
}
