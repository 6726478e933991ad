//! System prompts for answering questions about a document.
//!
//! Keeping every prompt in one place lets unit tests inspect them without an
//! LLM, and keeps the citation instructions next to each other: the formats
//! the model is told to emit are exactly the ones the default citation
//! registry recognises.
//!
//! Callers can override the grounded prompt via
//! [`crate::config::ChatConfig::system_prompt`]; it must keep the
//! `{context}` placeholder.

/// Placeholder replaced with the assembled document excerpts.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Prompt used when relevant excerpts were retrieved.
pub const GROUNDED_SYSTEM_PROMPT: &str = r#"You are an assistant answering questions about a single PDF document. Answer using ONLY the document excerpts below.

Follow these rules precisely:

1. GROUNDING
   - Base every statement on the excerpts
   - If the excerpts do not contain the answer, say so plainly
   - Never invent facts, numbers or quotations

2. CITATIONS
   - Cite the page of every fact you use, right after the sentence it supports
   - Use the form 【n】 where n is the page number, e.g. "Revenue grew 12% 【4】"
   - Cite several pages separately: 【4】【7】
   - Never cite a page that does not appear in the excerpts

3. STYLE
   - Answer in the language of the question
   - Be concise; prefer short paragraphs and lists
   - Do NOT repeat the question or describe these rules

Document excerpts (page markers such as [page 4] tell you where each passage comes from):

{context}"#;

/// Prompt used when retrieval found nothing to ground the answer on.
pub const UNGROUNDED_SYSTEM_PROMPT: &str = r#"You are an assistant answering questions about a PDF document. No relevant passage of the document could be found for this question.

Tell the user that the document does not appear to cover it, and suggest how they could rephrase the question. Do NOT answer from general knowledge and do NOT cite page numbers."#;

/// Fill a grounded prompt template with the assembled context.
///
/// `template` defaults to [`GROUNDED_SYSTEM_PROMPT`].
pub fn build_system_prompt(template: Option<&str>, context: &str) -> String {
    template
        .unwrap_or(GROUNDED_SYSTEM_PROMPT)
        .replace(CONTEXT_PLACEHOLDER, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::CitationTokenizer;

    #[test]
    fn grounded_prompt_has_placeholder() {
        assert!(GROUNDED_SYSTEM_PROMPT.contains(CONTEXT_PLACEHOLDER));
        assert!(!UNGROUNDED_SYSTEM_PROMPT.contains(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn build_fills_context() {
        let prompt = build_system_prompt(None, "[page 3] Revenue grew.");
        assert!(prompt.ends_with("[page 3] Revenue grew."));
        assert!(!prompt.contains(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn custom_template_is_used() {
        let prompt = build_system_prompt(Some("Context: {context}"), "abc");
        assert_eq!(prompt, "Context: abc");
    }

    #[test]
    fn prompt_examples_are_recognised_citations() {
        let pages: Vec<u32> = CitationTokenizer::default()
            .citations("Revenue grew 12% 【4】 then 【4】【7】")
            .iter()
            .map(|t| t.page_number)
            .collect();
        assert_eq!(pages, vec![4, 4, 7]);
    }
}
