//! Title matching and unlinked-mention detection.
//!
//! Note titles are compared case-insensitively after trimming. Mentions are
//! whole-word occurrences of a title in element text that are not already
//! covered by a link.

use std::collections::BTreeMap;
use std::ops::Range;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text::RichText;

/// Normalized lookup key for a title.
pub fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Whether two titles name the same note.
pub fn same_title(a: &str, b: &str) -> bool {
    title_key(a) == title_key(b)
}

/// Whole-word pattern for a title. Word boundaries are only enforced on
/// ends that are themselves word characters, so titles such as "C++" still
/// match.
fn title_pattern(title: &str, case_insensitive: bool) -> Option<Regex> {
    let title = title.trim();
    let first = title.chars().next()?;
    let last = title.chars().last()?;
    let is_word = |c: char| c.is_alphanumeric() || c == '_';

    let mut pattern = String::new();
    if is_word(first) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(title));
    if is_word(last) {
        pattern.push_str(r"\b");
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
        .ok()
}

/// Char spans of whole-word occurrences of `title` in `text`.
pub fn title_occurrences(text: &str, title: &str, case_insensitive: bool) -> Vec<Range<usize>> {
    let Some(pattern) = title_pattern(title, case_insensitive) else {
        return Vec::new();
    };
    pattern
        .find_iter(text)
        .map(|m| {
            let start = text[..m.start()].chars().count();
            start..start + m.as_str().chars().count()
        })
        .collect()
}

/// Occurrences of `title` in `text` that do not overlap a link.
pub fn unlinked_spans(text: &RichText, title: &str) -> Vec<Range<usize>> {
    let links = text.link_spans();
    title_occurrences(&text.text(), title, true)
        .into_iter()
        .filter(|span| {
            !links
                .iter()
                .any(|link| link.start < span.end && span.start < link.end)
        })
        .collect()
}

/// An element mentioning a note title without linking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkedMention {
    pub element_id: Uuid,
    pub spans: Vec<Range<usize>>,
}

/// Unlinked mentions grouped by the title they mention.
pub type UnlinkedReferences = BTreeMap<String, Vec<UnlinkedMention>>;

/// Merge `from` into `into`, concatenating mentions that share a title.
pub fn merge_unlinked(into: &mut UnlinkedReferences, from: UnlinkedReferences) {
    for (title, mentions) in from {
        into.entry(title).or_default().extend(mentions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Attribute;

    #[test]
    fn test_title_key_normalizes() {
        assert_eq!(title_key("  Rust Notes "), "rust notes");
        assert!(same_title("Rust", "rust "));
        assert!(!same_title("Rust", "Rusty"));
    }

    #[test]
    fn test_occurrences_whole_words_only() {
        let spans = title_occurrences("rust, Rusty and RUST", "Rust", true);
        assert_eq!(spans, vec![0..4, 16..20]);
        let spans = title_occurrences("rust, Rusty and RUST", "Rust", false);
        assert!(spans.is_empty());
    }

    #[test]
    fn test_occurrences_positions_are_chars() {
        let spans = title_occurrences("été Paris", "Paris", true);
        assert_eq!(spans, vec![4..9]);
    }

    #[test]
    fn test_occurrences_non_word_edges() {
        let spans = title_occurrences("I like C++ a lot", "C++", true);
        assert_eq!(spans, vec![7..10]);
    }

    #[test]
    fn test_occurrences_empty_title() {
        assert!(title_occurrences("anything", "  ", true).is_empty());
    }

    #[test]
    fn test_unlinked_spans_skip_links() {
        let mut text = RichText::new("Rust and Rust");
        text.add_attributes(&[Attribute::InternalLink("Rust".into())], 0..4);
        assert_eq!(unlinked_spans(&text, "rust"), vec![9..13]);
    }

    #[test]
    fn test_merge_unlinked() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut into = UnlinkedReferences::new();
        into.insert(
            "Rust".into(),
            vec![UnlinkedMention {
                element_id: a,
                spans: vec![0..4],
            }],
        );
        let mut from = UnlinkedReferences::new();
        from.insert(
            "Rust".into(),
            vec![UnlinkedMention {
                element_id: b,
                spans: vec![2..6],
            }],
        );
        from.insert("Go".into(), vec![]);
        merge_unlinked(&mut into, from);
        assert_eq!(into["Rust"].len(), 2);
        assert!(into.contains_key("Go"));
    }
}
