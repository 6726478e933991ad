//! Declarative citation pattern descriptors.
//!
//! Each citation format is one row of data: a name, a regex with a named
//! `page` group, the display style, and a priority. Supporting a new locale
//! means adding a row, not a branch:
//!
//! ```rust
//! use edgequake_pdfchat::citation::{CitationPattern, CitationStyle, PatternRegistry};
//!
//! let registry = PatternRegistry::builder_with_defaults()
//!     .pattern(
//!         CitationPattern::new("it_page", r"\(\s*pag\.\s*(?P<page>\d+)\s*\)", CitationStyle::Highlight, 70)
//!             .unwrap(),
//!     )
//!     .build();
//! assert!(registry.get("it_page").is_some());
//! ```
//!
//! ## Priority
//!
//! Higher priority patterns claim their spans first. Unambiguous formats
//! (`【3】`, `(page 3)`) rank above the bare `(3)`, which also matches
//! unrelated parenthesised numbers and must only get what nobody else wants.

use crate::error::PatternError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a citation is displayed in the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CitationStyle {
    /// Rendered as a numbered bubble (`【3】`, `[page 3]`).
    Bubble,
    /// The citation phrase itself is highlighted (`(page 3)`, `（第3页）`).
    Highlight,
    /// Low-confidence reference (`(3)`), rendered as a plain link.
    Plain,
}

/// One citation format.
#[derive(Debug, Clone)]
pub struct CitationPattern {
    name: String,
    regex: Regex,
    style: CitationStyle,
    priority: i32,
}

impl CitationPattern {
    /// Compile a descriptor. The regex must contain a `(?P<page>...)` group.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        style: CitationStyle,
        priority: i32,
    ) -> Result<Self, PatternError> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
            name: name.clone(),
            source,
        })?;
        if !regex.capture_names().any(|n| n == Some("page")) {
            return Err(PatternError::MissingPageGroup { name });
        }
        Ok(Self {
            name,
            regex,
            style,
            priority,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn style(&self) -> CitationStyle {
        self.style
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Citation patterns in the order they claim spans.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<CitationPattern>,
}

impl PatternRegistry {
    /// An empty builder.
    pub fn builder() -> PatternRegistryBuilder {
        PatternRegistryBuilder::default()
    }

    /// A builder pre-filled with the built-in formats.
    pub fn builder_with_defaults() -> PatternRegistryBuilder {
        PatternRegistryBuilder {
            patterns: default_registry().patterns.clone(),
        }
    }

    /// Patterns by descending priority; equal priorities keep insertion order.
    pub fn patterns(&self) -> &[CitationPattern] {
        &self.patterns
    }

    pub fn get(&self, name: &str) -> Option<&CitationPattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Builder for [`PatternRegistry`].
#[derive(Debug, Default)]
pub struct PatternRegistryBuilder {
    patterns: Vec<CitationPattern>,
}

impl PatternRegistryBuilder {
    /// Add a pattern. A pattern with the same name replaces the earlier one.
    pub fn pattern(mut self, pattern: CitationPattern) -> Self {
        self.patterns.retain(|p| p.name != pattern.name);
        self.patterns.push(pattern);
        self
    }

    /// Drop a pattern by name.
    pub fn without(mut self, name: &str) -> Self {
        self.patterns.retain(|p| p.name != name);
        self
    }

    pub fn build(mut self) -> PatternRegistry {
        // Stable: equal priorities keep insertion order.
        self.patterns.sort_by(|a, b| b.priority.cmp(&a.priority));
        PatternRegistry {
            patterns: self.patterns,
        }
    }
}

/// Built-in formats: (name, regex, style, priority).
const DEFAULT_PATTERNS: &[(&str, &str, CitationStyle, i32)] = &[
    (
        "bubble",
        r"【\s*(?:(?i:pages?|p\.?)\s*)?(?P<page>\d+)\s*】",
        CitationStyle::Bubble,
        100,
    ),
    (
        "bracket_page",
        r"\[\s*(?i:pages?|pgs?\.?|pp?\.)\s*(?P<page>\d+)(?:\s*[-–]\s*\d+)?\s*\]",
        CitationStyle::Bubble,
        90,
    ),
    (
        "en_page",
        r"[(（]\s*(?i:pages?|pgs?\.?|pp?\.)\s*(?P<page>\d+)(?:\s*[-–]\s*\d+)?\s*[)）]",
        CitationStyle::Highlight,
        80,
    ),
    (
        "de_page",
        r"\(\s*(?:Seite|S\.)\s*(?P<page>\d+)\s*\)",
        CitationStyle::Highlight,
        70,
    ),
    (
        "es_pt_page",
        r"\(\s*(?i:p[áa]gina|p[áa]g\.)\s*(?P<page>\d+)\s*\)",
        CitationStyle::Highlight,
        70,
    ),
    (
        "zh_page",
        r"[(（]\s*第\s*(?P<page>\d+)\s*[页頁]\s*[)）]",
        CitationStyle::Highlight,
        70,
    ),
    (
        "ja_page",
        r"[(（]\s*(?P<page>\d+)\s*ページ\s*[)）]",
        CitationStyle::Highlight,
        70,
    ),
    (
        "ko_page",
        r"[(（]\s*(?P<page>\d+)\s*(?:페이지|쪽)\s*[)）]",
        CitationStyle::Highlight,
        70,
    ),
    (
        "bare_paren",
        r"[(（](?P<page>\d+)[)）]",
        CitationStyle::Plain,
        0,
    ),
];

static DEFAULT_REGISTRY: Lazy<Arc<PatternRegistry>> = Lazy::new(|| {
    let builder = DEFAULT_PATTERNS
        .iter()
        .fold(PatternRegistry::builder(), |b, (name, re, style, prio)| {
            b.pattern(CitationPattern::new(*name, re, *style, *prio).unwrap())
        });
    Arc::new(builder.build())
});

/// The built-in registry, compiled once.
pub fn default_registry() -> Arc<PatternRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_priority_ordered() {
        let reg = default_registry();
        let prios: Vec<i32> = reg.patterns().iter().map(|p| p.priority()).collect();
        let mut sorted = prios.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(prios, sorted);
        assert_eq!(reg.patterns()[0].name(), "bubble");
        assert_eq!(reg.patterns().last().unwrap().name(), "bare_paren");
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let reg = default_registry();
        let names: Vec<&str> = reg
            .patterns()
            .iter()
            .filter(|p| p.priority() == 70)
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["de_page", "es_pt_page", "zh_page", "ja_page", "ko_page"]);
    }

    #[test]
    fn french_page_citations_use_the_english_pattern() {
        let reg = default_registry();
        let en = reg.get("en_page").unwrap();
        assert!(en.regex().is_match("(page 4)"));
        assert!(en.regex().is_match("(p. 4)"));
        let es_pt = reg.get("es_pt_page").unwrap();
        assert!(es_pt.regex().is_match("(página 4)"));
        assert!(es_pt.regex().is_match("(pág. 4)"));
        assert!(reg.get("fr_es_page").is_none());
    }

    #[test]
    fn pattern_without_page_group_is_rejected() {
        let err = CitationPattern::new("bad", r"\((\d+)\)", CitationStyle::Plain, 1).unwrap_err();
        assert!(matches!(err, PatternError::MissingPageGroup { .. }));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = CitationPattern::new("bad", r"(?P<page>\d+", CitationStyle::Plain, 1).unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex { .. }));
    }

    #[test]
    fn same_name_replaces_pattern() {
        let reg = PatternRegistry::builder_with_defaults()
            .pattern(CitationPattern::new("bare_paren", r"<(?P<page>\d+)>", CitationStyle::Plain, 5).unwrap())
            .build();
        assert_eq!(reg.len(), default_registry().len());
        assert_eq!(reg.get("bare_paren").unwrap().priority(), 5);
    }

    #[test]
    fn without_removes_pattern() {
        let reg = PatternRegistry::builder_with_defaults()
            .without("bare_paren")
            .build();
        assert!(reg.get("bare_paren").is_none());
    }
}
