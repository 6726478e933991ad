//! Answer text → text segments interleaved with citation tokens.
//!
//! ## Algorithm
//!
//! 1. Walk the registry in priority order; each pattern finds all of its
//!    matches in the text.
//! 2. A match is accepted only if its `page` group parses to a positive page
//!    number and its span does not intersect an already accepted span.
//!    First accepted wins, so a higher-priority format always beats a lower
//!    one over the same characters.
//! 3. Accepted spans, in left-to-right order, split the text into segments.
//!
//! Concatenating the segments (text verbatim, tokens by `raw_text`) gives
//! back the input exactly. Rejected candidates are never shown as dead links:
//! they simply stay part of the surrounding text.

use super::pattern::{default_registry, CitationStyle, PatternRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// A page reference found in answer text.
///
/// Spans are byte offsets into the tokenized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationToken {
    pub raw_text: String,
    pub page_number: u32,
    pub span_start: usize,
    pub span_end: usize,
    pub style: CitationStyle,
}

impl CitationToken {
    pub fn span(&self) -> Range<usize> {
        self.span_start..self.span_end
    }
}

/// One piece of a tokenized answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Citation(CitationToken),
}

impl Segment {
    /// The original characters this segment covers.
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(s) => s,
            Segment::Citation(t) => &t.raw_text,
        }
    }

    pub fn as_citation(&self) -> Option<&CitationToken> {
        match self {
            Segment::Citation(t) => Some(t),
            Segment::Text(_) => None,
        }
    }

    /// All citations of a segment list, left to right.
    pub fn citations(segments: &[Segment]) -> impl Iterator<Item = &CitationToken> {
        segments.iter().filter_map(Segment::as_citation)
    }

    /// Reassemble the original text.
    pub fn concat(segments: &[Segment]) -> String {
        segments.iter().map(Segment::as_str).collect()
    }
}

/// Scans answer text for page citations.
#[derive(Debug, Clone)]
pub struct CitationTokenizer {
    registry: Arc<PatternRegistry>,
}

impl Default for CitationTokenizer {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

impl CitationTokenizer {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Split `text` into plain segments and citation tokens.
    ///
    /// With no citation found the result is a single text segment holding
    /// the whole input.
    pub fn tokenize(&self, text: &str) -> Vec<Segment> {
        // start -> (end, page, style); disjoint by construction.
        let mut accepted: BTreeMap<usize, (usize, u32, CitationStyle)> = BTreeMap::new();

        for pattern in self.registry.patterns() {
            for caps in pattern.regex().captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                let Some(page) = caps.name("page").and_then(|m| parse_page_number(m.as_str()))
                else {
                    continue;
                };
                if overlaps(&accepted, whole.start(), whole.end()) {
                    debug!(
                        "Citation candidate {:?} ({}) overlaps an earlier match; dropped",
                        whole.as_str(),
                        pattern.name()
                    );
                    continue;
                }
                accepted.insert(whole.start(), (whole.end(), page, pattern.style()));
            }
        }

        if accepted.is_empty() {
            return vec![Segment::Text(text.to_string())];
        }

        let mut segments = Vec::with_capacity(accepted.len() * 2 + 1);
        let mut cursor = 0usize;
        for (start, (end, page, style)) in accepted {
            if start > cursor {
                segments.push(Segment::Text(text[cursor..start].to_string()));
            }
            segments.push(Segment::Citation(CitationToken {
                raw_text: text[start..end].to_string(),
                page_number: page,
                span_start: start,
                span_end: end,
                style,
            }));
            cursor = end;
        }
        if cursor < text.len() {
            segments.push(Segment::Text(text[cursor..].to_string()));
        }
        segments
    }

    /// Just the tokens, left to right.
    pub fn citations(&self, text: &str) -> Vec<CitationToken> {
        self.tokenize(text)
            .into_iter()
            .filter_map(|s| match s {
                Segment::Citation(t) => Some(t),
                Segment::Text(_) => None,
            })
            .collect()
    }
}

/// Whether `[start, end)` intersects any accepted span.
///
/// Accepted spans are disjoint, so only the last one starting before `end`
/// can reach into the candidate.
fn overlaps(accepted: &BTreeMap<usize, (usize, u32, CitationStyle)>, start: usize, end: usize) -> bool {
    accepted
        .range(..end)
        .next_back()
        .is_some_and(|(_, (prev_end, _, _))| *prev_end > start)
}

/// Parse a run of decimal digits into a positive page number.
///
/// ASCII, full-width (`０`–`９`) and Arabic-Indic digits are accepted. Zero,
/// overflow and any other character reject the number.
fn parse_page_number(digits: &str) -> Option<u32> {
    let mut value: u32 = 0;
    let mut seen = false;
    for ch in digits.chars() {
        let d = match ch {
            '0'..='9' => ch as u32 - '0' as u32,
            '０'..='９' => ch as u32 - '０' as u32,
            '٠'..='٩' => ch as u32 - '٠' as u32,
            _ => return None,
        };
        value = value.checked_mul(10)?.checked_add(d)?;
        seen = true;
    }
    (seen && value > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::pattern::CitationPattern;

    fn tokens(text: &str) -> Vec<CitationToken> {
        CitationTokenizer::default().citations(text)
    }

    fn pages(text: &str) -> Vec<(u32, CitationStyle)> {
        tokens(text).iter().map(|t| (t.page_number, t.style)).collect()
    }

    #[test]
    fn bubble_beats_generic_parenthetical() {
        let text = "See 【3】 and also (page 10).";
        let toks = tokens(text);
        assert_eq!(toks.len(), 2);
        assert_eq!((toks[0].page_number, toks[0].style), (3, CitationStyle::Bubble));
        assert_eq!(&text[toks[0].span()], "【3】");
        assert_eq!((toks[1].page_number, toks[1].style), (10, CitationStyle::Highlight));
        assert_eq!(&text[toks[1].span()], "(page 10)");
    }

    #[test]
    fn adjacent_parentheticals_are_independent() {
        assert_eq!(
            pages("(7)(7)"),
            vec![(7, CitationStyle::Plain), (7, CitationStyle::Plain)]
        );
    }

    #[test]
    fn no_citation_returns_whole_text() {
        let segs = CitationTokenizer::default().tokenize("Nothing to cite here.");
        assert_eq!(segs, vec![Segment::Text("Nothing to cite here.".into())]);
    }

    #[test]
    fn empty_text_is_one_empty_segment() {
        let segs = CitationTokenizer::default().tokenize("");
        assert_eq!(segs, vec![Segment::Text(String::new())]);
    }

    #[test]
    fn page_zero_is_dropped_and_text_kept() {
        let text = "Preface (page 0) then (0).";
        let segs = CitationTokenizer::default().tokenize(text);
        assert_eq!(Segment::citations(&segs).count(), 0);
        assert_eq!(Segment::concat(&segs), text);
    }

    #[test]
    fn malformed_numerals_never_match() {
        assert!(tokens("Page abc and (page abc) and (p. x)").is_empty());
    }

    #[test]
    fn huge_numbers_are_dropped() {
        assert!(tokens("(99999999999999)").is_empty());
    }

    #[test]
    fn locale_formats_are_recognised() {
        assert_eq!(pages("(Seite 4)"), vec![(4, CitationStyle::Highlight)]);
        assert_eq!(pages("(S. 12)"), vec![(12, CitationStyle::Highlight)]);
        assert_eq!(pages("(página 8)"), vec![(8, CitationStyle::Highlight)]);
        assert_eq!(pages("（第5页）"), vec![(5, CitationStyle::Highlight)]);
        assert_eq!(pages("(第6頁)"), vec![(6, CitationStyle::Highlight)]);
        assert_eq!(pages("（9ページ）"), vec![(9, CitationStyle::Highlight)]);
        assert_eq!(pages("(2페이지)"), vec![(2, CitationStyle::Highlight)]);
        assert_eq!(pages("[p. 14]"), vec![(14, CitationStyle::Bubble)]);
        assert_eq!(pages("【page 21】"), vec![(21, CitationStyle::Bubble)]);
    }

    #[test]
    fn full_width_digits_are_parsed() {
        assert_eq!(pages("【３】"), vec![(3, CitationStyle::Bubble)]);
        assert_eq!(pages("（１２）"), vec![(12, CitationStyle::Plain)]);
    }

    #[test]
    fn page_range_cites_first_page() {
        let text = "as shown (pages 10-12).";
        let toks = tokens(text);
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].page_number, 10);
        assert_eq!(toks[0].raw_text, "(pages 10-12)");
    }

    #[test]
    fn tokens_are_left_to_right_and_disjoint() {
        let text = "(3) first, 【1】 second, (page 2) third, (Seite 9) and (4)";
        let toks = tokens(text);
        assert_eq!(
            toks.iter().map(|t| t.page_number).collect::<Vec<_>>(),
            vec![3, 1, 2, 9, 4]
        );
        for pair in toks.windows(2) {
            assert!(pair[0].span_end <= pair[1].span_start);
        }
    }

    #[test]
    fn round_trip_reconstructs_input() {
        let inputs = [
            "",
            "plain",
            "(1)",
            "a【2】b(page 3)c(4)d",
            "nested 【(5)】 brackets",
            "multi-byte 日本語（第3页）テキスト (7)",
            "((8)) and (page (9))",
        ];
        let tokenizer = CitationTokenizer::default();
        for input in inputs {
            let segs = tokenizer.tokenize(input);
            assert_eq!(Segment::concat(&segs), input, "input: {input:?}");
        }
    }

    #[test]
    fn higher_priority_wins_overlapping_candidates() {
        // A custom pattern that also claims "(page 3)" at lower priority.
        let registry = PatternRegistry::builder_with_defaults()
            .pattern(
                CitationPattern::new("loose", r"page (?P<page>\d+)", CitationStyle::Plain, -10)
                    .unwrap(),
            )
            .build();
        let toks = CitationTokenizer::new(Arc::new(registry)).citations("(page 3)");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].style, CitationStyle::Highlight);
    }

    #[test]
    fn segments_serialize_with_type_tag() {
        let segs = CitationTokenizer::default().tokenize("x (2)");
        let json = serde_json::to_value(&segs).unwrap();
        assert_eq!(json[0]["type"], "text");
        assert_eq!(json[1]["type"], "citation");
        assert_eq!(json[1]["value"]["page_number"], 2);
    }

    #[test]
    fn parse_page_number_rules() {
        assert_eq!(parse_page_number("42"), Some(42));
        assert_eq!(parse_page_number("０７"), Some(7));
        assert_eq!(parse_page_number("٣"), Some(3));
        assert_eq!(parse_page_number("0"), None);
        assert_eq!(parse_page_number(""), None);
        assert_eq!(parse_page_number("4x"), None);
    }
}
