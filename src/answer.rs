//! Question → grounded, cited answer.
//!
//! ```text
//! question ─▶ embed ─▶ SimilarityRanker ─▶ ContextAssembler ─▶ system prompt
//!                                                                   │
//!               segments ◀─ CitationTokenizer ◀─ answer text ◀─ LLM chat
//! ```
//!
//! Everything up to the prompt is pure and lives in [`prepare_prompt`], so it
//! can be tested without a provider. [`ask`] adds the two network calls.
//!
//! ## Retry Strategy
//!
//! The chat call is retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): 500 ms → 1 s → 2 s with the
//! defaults. Embedding is not retried; a failed embedding is reported as
//! [`ChatError::EmbeddingFailed`] at once.

use crate::citation::{CitationTokenizer, Segment};
use crate::config::{AnswerQuality, ChatConfig};
use crate::error::ChatError;
use crate::prompts::{build_system_prompt, UNGROUNDED_SYSTEM_PROMPT};
use crate::retrieval::{ContextAssembler, EmbeddingIndex, RetrievedContext, SimilarityRanker};
use edgequake_llm::{ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, ProviderFactory};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Default chat model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Whether an answer could be grounded on retrieved excerpts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextQuality {
    Grounded,
    /// Retrieval came back empty; the ungrounded prompt was used.
    Ungrounded,
}

/// The request that will be sent to the LLM.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub system_prompt: String,
    pub question: String,
    pub context: RetrievedContext,
    pub quality: ContextQuality,
}

impl PreparedPrompt {
    /// System message followed by the user's question.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(self.question.as_str()),
        ]
    }
}

/// A generated answer with its citations.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub segments: Vec<Segment>,
    pub context: RetrievedContext,
    pub quality: ContextQuality,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

impl Answer {
    /// Distinct cited pages, ascending.
    pub fn cited_pages(&self) -> Vec<u32> {
        Segment::citations(&self.segments)
            .map(|t| t.page_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Rank, assemble and build the system prompt for a question.
///
/// `query_embedding` must have `config.embedding_dim` entries.
pub fn prepare_prompt(
    question: &str,
    query_embedding: &[f32],
    index: &EmbeddingIndex,
    config: &ChatConfig,
    quality: AnswerQuality,
) -> Result<PreparedPrompt, ChatError> {
    if query_embedding.len() != config.embedding_dim {
        return Err(ChatError::EmbeddingDimensionMismatch {
            expected: config.embedding_dim,
            actual: query_embedding.len(),
        });
    }

    let ranker = SimilarityRanker::from_config(config);
    let context = ranker.rank(query_embedding, index, config.top_k_for(quality));

    if context.is_empty() {
        warn!(
            "No context retrieved for the question ({} chunks indexed); answering ungrounded",
            index.len()
        );
        return Ok(PreparedPrompt {
            system_prompt: UNGROUNDED_SYSTEM_PROMPT.to_string(),
            question: question.to_string(),
            context,
            quality: ContextQuality::Ungrounded,
        });
    }

    let assembled =
        ContextAssembler::from_config(config).assemble(&context, config.context_budget_chars);
    debug!(
        "Retrieved chunks {:?} ({} chars of context)",
        context.indices(),
        context.total_chars
    );

    Ok(PreparedPrompt {
        system_prompt: build_system_prompt(config.system_prompt.as_deref(), &assembled),
        question: question.to_string(),
        context,
        quality: ContextQuality::Grounded,
    })
}

/// Answer a question about an indexed document.
///
/// Resolves both providers from `config`, embeds the question and hands over
/// to [`answer_with_embedding`].
pub async fn ask(
    question: &str,
    index: &EmbeddingIndex,
    config: &ChatConfig,
) -> Result<Answer, ChatError> {
    let provider = resolve_provider(config)?;
    let embedder = resolve_embedder(config)?;
    let embedding = embed_question(embedder.as_ref(), question, config.embedding_dim).await?;
    answer_with_embedding(&provider, question, &embedding, index, config).await
}

/// Answer a question whose embedding is already known.
pub async fn answer_with_embedding(
    provider: &Arc<dyn LLMProvider>,
    question: &str,
    query_embedding: &[f32],
    index: &EmbeddingIndex,
    config: &ChatConfig,
) -> Result<Answer, ChatError> {
    let start = Instant::now();
    let prepared = prepare_prompt(question, query_embedding, index, config, config.quality)?;
    let completion = chat_with_retry(provider, &prepared.messages(), config).await?;

    let segments = CitationTokenizer::default().tokenize(&completion.text);
    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Answered in {}ms: {} in / {} out tokens, {} citations",
        duration_ms,
        completion.input_tokens,
        completion.output_tokens,
        Segment::citations(&segments).count()
    );

    Ok(Answer {
        text: completion.text,
        segments,
        context: prepared.context,
        quality: prepared.quality,
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
        retries: completion.retries,
        duration_ms,
    })
}

/// Embed the question and check its length.
pub async fn embed_question(
    embedder: &dyn EmbeddingProvider,
    question: &str,
    expected_dim: usize,
) -> Result<Vec<f32>, ChatError> {
    let vectors = embedder
        .embed(&[question.to_string()])
        .await
        .map_err(|e| ChatError::EmbeddingFailed(e.to_string()))?;
    let embedding = vectors
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::EmbeddingFailed("provider returned no vector".into()))?;
    if embedding.len() != expected_dim {
        return Err(ChatError::EmbeddingDimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

struct Completion {
    text: String,
    input_tokens: usize,
    output_tokens: usize,
    retries: u32,
}

async fn chat_with_retry(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    config: &ChatConfig,
) -> Result<Completion, ChatError> {
    let options = build_options(config);
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Chat retry {}/{} after {}ms",
                attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match provider.chat(messages, Some(&options)).await {
            Ok(response) => {
                return Ok(Completion {
                    text: response.content,
                    input_tokens: response.prompt_tokens,
                    output_tokens: response.completion_tokens,
                    retries: attempt,
                });
            }
            Err(e) => {
                let err_msg = format!("{}", e);
                warn!("Chat attempt {} failed: {}", attempt + 1, err_msg);
                last_err = Some(err_msg);
            }
        }
    }

    Err(ChatError::LlmApiError {
        message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        retries: config.max_retries,
    })
}

/// Delay before retry `attempt` (1-based), doubling each time.
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
}

fn build_options(config: &ChatConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_chat_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ChatError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ChatError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the chat provider, from most-specific to least-specific.
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (default [`DEFAULT_MODEL`]).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. `ProviderFactory::from_env()` auto-detection.
pub fn resolve_provider(config: &ChatConfig) -> Result<Arc<dyn LLMProvider>, ChatError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_chat_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_chat_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_chat_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(auto_detect_failed)?;
    Ok(llm_provider)
}

/// Resolve the question embedder: `config.embedding_provider`, else the
/// embedding half of `ProviderFactory::from_env()`.
pub fn resolve_embedder(config: &ChatConfig) -> Result<Arc<dyn EmbeddingProvider>, ChatError> {
    if let Some(ref embedder) = config.embedding_provider {
        return Ok(Arc::clone(embedder));
    }
    let (_llm, embedding) = ProviderFactory::from_env().map_err(auto_detect_failed)?;
    Ok(embedding)
}

fn auto_detect_failed(e: impl std::fmt::Display) -> ChatError {
    ChatError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::DocumentChunk;

    fn config(dim: usize) -> ChatConfig {
        ChatConfig::builder()
            .embedding_dim(dim)
            .fast_top_k(2)
            .quality_top_k(3)
            .context_budget_chars(200)
            .build()
            .unwrap()
    }

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::new(vec![
            DocumentChunk::new(0, "[page 1] Intro.", vec![1.0, 0.0]),
            DocumentChunk::new(1, "[page 2] Unrelated.", vec![0.0, 1.0]),
            DocumentChunk::new(2, "[page 3] Close match.", vec![0.9, 0.1]),
        ])
    }

    #[test]
    fn prepare_grounds_on_top_chunks() {
        let p = prepare_prompt("What?", &[1.0, 0.0], &index(), &config(2), AnswerQuality::Fast)
            .unwrap();
        assert_eq!(p.quality, ContextQuality::Grounded);
        assert_eq!(p.context.indices(), vec![0, 2]);
        assert!(p.system_prompt.contains("[page 1] Intro."));
        assert!(p.system_prompt.contains("[page 3] Close match."));
        assert!(!p.system_prompt.contains("Unrelated"));
        assert_eq!(p.messages().len(), 2);
    }

    #[test]
    fn high_quality_retrieves_more() {
        let p = prepare_prompt(
            "What?",
            &[1.0, 0.0],
            &index(),
            &config(2),
            AnswerQuality::HighQuality,
        )
        .unwrap();
        assert_eq!(p.context.chunks.len(), 3);
    }

    #[test]
    fn empty_index_is_ungrounded() {
        let p = prepare_prompt(
            "What?",
            &[1.0, 0.0],
            &EmbeddingIndex::default(),
            &config(2),
            AnswerQuality::Fast,
        )
        .unwrap();
        assert_eq!(p.quality, ContextQuality::Ungrounded);
        assert_eq!(p.system_prompt, UNGROUNDED_SYSTEM_PROMPT);
        assert_eq!(p.context.total_chars, 0);
    }

    #[test]
    fn wrong_query_dimension_is_rejected() {
        let err = prepare_prompt("What?", &[1.0, 0.0, 0.0], &index(), &config(2), AnswerQuality::Fast)
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::EmbeddingDimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn context_respects_budget() {
        let cfg = ChatConfig::builder()
            .embedding_dim(2)
            .context_budget_chars(20)
            .build()
            .unwrap();
        let p = prepare_prompt("What?", &[1.0, 0.0], &index(), &cfg, AnswerQuality::Fast).unwrap();
        assert!(p.context.total_chars <= 20);
    }

    #[test]
    fn custom_system_prompt_is_filled() {
        let cfg = ChatConfig::builder()
            .embedding_dim(2)
            .system_prompt("Excerpts:\n{context}")
            .build()
            .unwrap();
        let p = prepare_prompt("What?", &[1.0, 0.0], &index(), &cfg, AnswerQuality::Fast).unwrap();
        assert!(p.system_prompt.starts_with("Excerpts:\n[page 1] Intro."));
    }

    #[test]
    fn cited_pages_are_distinct_and_sorted() {
        let text = "A 【4】 B (page 2) C 【4】";
        let answer = Answer {
            text: text.to_string(),
            segments: CitationTokenizer::default().tokenize(text),
            context: RetrievedContext::default(),
            quality: ContextQuality::Grounded,
            input_tokens: 0,
            output_tokens: 0,
            retries: 0,
            duration_ms: 0,
        };
        assert_eq!(answer.cited_pages(), vec![2, 4]);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(retry_backoff_ms(500, 1), 500);
        assert_eq!(retry_backoff_ms(500, 3), 2000);
        assert_eq!(retry_backoff_ms(500, 60), u64::MAX);
        assert_eq!(retry_backoff_ms(500, 200), u64::MAX);
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ChatConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(1024));
    }
}
