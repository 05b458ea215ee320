//! Attributed text: an ordered list of ranges, each owning a string and a
//! set of formatting or link attributes.
//!
//! Positions are counted in `char`s. The public API clamps positions and
//! ranges to `[0, len]`; the internal split routine asserts its bounds.
//!
//! After every mutation the ranges are contiguous, cover the whole text,
//! and no two neighbours carry the same attribute set ("flattened"). There
//! is always at least one range, possibly empty.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::references;

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Formatting or link attribute attached to a text range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAttribute", into = "RawAttribute")]
pub enum Attribute {
    Strong,
    Emphasis,
    /// Provenance of the text (usually a URL).
    Source(String),
    /// External hyperlink.
    Link(String),
    /// Link to another note, by title.
    InternalLink(String),
    Heading(u8),
    Quote {
        level: u8,
        title: Option<String>,
        source: Option<String>,
    },
    Strikethrough,
    Underline,
}

impl Attribute {
    /// Stable kind name, also used as the persisted `type` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Attribute::Strong => "strong",
            Attribute::Emphasis => "emphasis",
            Attribute::Source(_) => "source",
            Attribute::Link(_) => "link",
            Attribute::InternalLink(_) => "internalLink",
            Attribute::Heading(_) => "heading",
            Attribute::Quote { .. } => "quote",
            Attribute::Strikethrough => "strikethrough",
            Attribute::Underline => "underline",
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Attribute::Link(_) | Attribute::InternalLink(_))
    }

    pub fn is_internal_link(&self) -> bool {
        matches!(self, Attribute::InternalLink(_))
    }

    /// Link targets are not editable in place.
    pub fn is_editable(&self) -> bool {
        !self.is_link()
    }
}

/// Persisted shape of an attribute:
/// `{"type": "<name>", "payload"?: ..., "level"?: ..., "title"?: ..., "source"?: ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAttribute {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl RawAttribute {
    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: None,
            level: None,
            title: None,
            source: None,
        }
    }

    fn required_payload(self) -> Result<String, String> {
        let kind = self.kind;
        self.payload
            .ok_or_else(|| format!("attribute '{kind}' is missing its payload"))
    }
}

impl From<Attribute> for RawAttribute {
    fn from(attribute: Attribute) -> Self {
        let mut raw = RawAttribute::bare(attribute.kind_name());
        match attribute {
            Attribute::Source(value) | Attribute::Link(value) | Attribute::InternalLink(value) => {
                raw.payload = Some(value)
            }
            Attribute::Heading(level) => raw.level = Some(level),
            Attribute::Quote {
                level,
                title,
                source,
            } => {
                raw.level = Some(level);
                raw.title = title;
                raw.source = source;
            }
            Attribute::Strong
            | Attribute::Emphasis
            | Attribute::Strikethrough
            | Attribute::Underline => {}
        }
        raw
    }
}

impl TryFrom<RawAttribute> for Attribute {
    type Error = String;

    fn try_from(raw: RawAttribute) -> Result<Self, Self::Error> {
        let kind = raw.kind.clone();
        Ok(match kind.as_str() {
            "strong" => Attribute::Strong,
            "emphasis" => Attribute::Emphasis,
            "strikethrough" => Attribute::Strikethrough,
            "underline" => Attribute::Underline,
            "source" => Attribute::Source(raw.required_payload()?),
            "link" => Attribute::Link(raw.required_payload()?),
            "internalLink" => Attribute::InternalLink(raw.required_payload()?),
            "heading" => Attribute::Heading(raw.level.unwrap_or(1)),
            "quote" => Attribute::Quote {
                level: raw.level.unwrap_or(1),
                title: raw.title,
                source: raw.source,
            },
            other => return Err(format!("unknown attribute type '{other}'")),
        })
    }
}

/// Set equality: same members regardless of order.
fn same_attributes(a: &[Attribute], b: &[Attribute]) -> bool {
    a.len() == b.len() && a.iter().all(|attr| b.contains(attr))
}

// =============================================================================
// RANGES
// =============================================================================

/// A contiguous span of text sharing one attribute set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextRange {
    pub string: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    /// Start offset in chars. Derived, recomputed after every edit.
    #[serde(skip)]
    pub position: usize,
}

impl TextRange {
    pub fn new(string: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            string: string.into(),
            attributes,
            position: 0,
        }
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.string.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.string.is_empty()
    }

    pub fn end(&self) -> usize {
        self.position + self.len()
    }

    pub fn span(&self) -> Range<usize> {
        self.position..self.end()
    }

    /// Title of the note this range links to, if any.
    pub fn internal_link(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::InternalLink(title) => Some(title.as_str()),
            _ => None,
        })
    }

    pub fn source(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Source(source) => Some(source.as_str()),
            _ => None,
        })
    }

    pub fn is_link(&self) -> bool {
        self.attributes.iter().any(Attribute::is_link)
    }
}

/// Byte offset of the given char offset in `s`.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

// =============================================================================
// RICH TEXT
// =============================================================================

/// Attributed text value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RichTextRepr")]
pub struct RichText {
    ranges: Vec<TextRange>,
    /// While non-zero, flattening is deferred.
    #[serde(skip)]
    silent: u32,
}

#[derive(Deserialize)]
struct RichTextRepr {
    #[serde(default)]
    ranges: Vec<TextRange>,
}

impl From<RichTextRepr> for RichText {
    fn from(repr: RichTextRepr) -> Self {
        let mut text = RichText {
            ranges: repr.ranges,
            silent: 0,
        };
        text.flatten();
        text
    }
}

impl PartialEq for RichText {
    fn eq(&self, other: &Self) -> bool {
        self.ranges == other.ranges
    }
}

impl Default for RichText {
    fn default() -> Self {
        Self::new("")
    }
}

impl From<&str> for RichText {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RichText {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for RichText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for range in &self.ranges {
            f.write_str(&range.string)?;
        }
        Ok(())
    }
}

impl RichText {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_attributes(text, Vec::new())
    }

    pub fn with_attributes(text: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            ranges: vec![TextRange::new(text, attributes)],
            silent: 0,
        }
    }

    /// Build from explicit ranges. The result is flattened.
    pub fn from_ranges(ranges: Vec<TextRange>) -> Self {
        let mut text = Self { ranges, silent: 0 };
        text.flatten();
        text
    }

    pub fn ranges(&self) -> &[TextRange] {
        &self.ranges
    }

    /// Plain text.
    pub fn text(&self) -> String {
        self.ranges.iter().map(|r| r.string.as_str()).collect()
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.ranges.last().map_or(0, TextRange::end)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.iter().all(TextRange::is_empty)
    }

    pub fn whole_range(&self) -> Range<usize> {
        0..self.len()
    }

    pub fn clamp(&self, position: usize) -> usize {
        position.min(self.len())
    }

    pub fn clamp_range(&self, range: Range<usize>) -> Range<usize> {
        let start = self.clamp(range.start);
        let end = self.clamp(range.end).max(start);
        start..end
    }

    /// Whether the ranges are contiguous and cover `[0, len)` exactly.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 0;
        for range in &self.ranges {
            if range.position != expected {
                return false;
            }
            expected = range.end();
        }
        !self.ranges.is_empty()
    }

    /// Whether no two neighbouring ranges share an attribute set and no
    /// empty range survives next to another range.
    pub fn is_flat(&self) -> bool {
        if self.ranges.len() > 1 && self.ranges.iter().any(TextRange::is_empty) {
            return false;
        }
        self.ranges
            .windows(2)
            .all(|w| !same_attributes(&w[0].attributes, &w[1].attributes))
    }

    /// Index of the range containing `position`. At a boundary this is the
    /// range that ends there.
    pub fn range_index_at(&self, position: usize) -> Option<usize> {
        let position = self.clamp(position);
        self.ranges
            .iter()
            .position(|r| r.position <= position && position <= r.end())
    }

    /// Range containing `position` (clamped).
    pub fn range_at(&self, position: usize) -> &TextRange {
        let index = self.range_index_at(position).unwrap_or(0);
        &self.ranges[index]
    }

    /// Ranges touching `position`. At a boundary both neighbours are
    /// returned.
    pub fn ranges_at(&self, position: usize) -> Vec<&TextRange> {
        let position = self.clamp(position);
        self.ranges
            .iter()
            .filter(|r| r.position <= position && position <= r.end())
            .collect()
    }

    /// Recompute derived range positions.
    fn compute_positions(&mut self) {
        let mut position = 0;
        for range in &mut self.ranges {
            range.position = position;
            position += range.len();
        }
    }

    /// Merge neighbours with equal attribute sets and drop empty ranges,
    /// always keeping at least one range.
    pub fn flatten(&mut self) {
        if self.silent > 0 {
            return;
        }
        let only_one = self.ranges.len() == 1;
        let mut flattened: Vec<TextRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            if range.is_empty() && !only_one {
                continue;
            }
            match flattened.last_mut() {
                Some(last) if same_attributes(&last.attributes, &range.attributes) => {
                    last.string.push_str(&range.string);
                }
                _ => flattened.push(range),
            }
        }
        if flattened.is_empty() {
            flattened.push(TextRange::default());
        }
        self.ranges = flattened;
        self.compute_positions();
    }

    /// Run `f` with flattening deferred, then flatten once. Nested calls
    /// only flatten when the outermost one exits.
    /// The counter is restored even when `f` panics.
    pub fn silently<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        struct Silenced<'a>(&'a mut RichText);
        impl Drop for Silenced<'_> {
            fn drop(&mut self) {
                self.0.silent -= 1;
                self.0.compute_positions();
                self.0.flatten();
            }
        }
        self.silent += 1;
        let mut guard = Silenced(self);
        f(&mut *guard.0)
    }

    /// Split so that a range starts exactly at `position` and return its
    /// index (`ranges.len()` when `position` is the end). Never creates
    /// empty ranges.
    fn split_at(&mut self, position: usize) -> usize {
        assert!(
            position <= self.len(),
            "split position {position} beyond text length {}",
            self.len()
        );
        let mut start = 0;
        for index in 0..self.ranges.len() {
            if position == start {
                return index;
            }
            let len = self.ranges[index].len();
            if position < start + len {
                let range = &mut self.ranges[index];
                let cut = byte_offset(&range.string, position - start);
                let tail = range.string.split_off(cut);
                let second = TextRange {
                    string: tail,
                    attributes: range.attributes.clone(),
                    position,
                };
                self.ranges.insert(index + 1, second);
                return index + 1;
            }
            start += len;
        }
        self.ranges.len()
    }

    /// Split at both bounds of `range` and return the index span covering it.
    fn split_span(&mut self, range: Range<usize>) -> Range<usize> {
        let range = self.clamp_range(range);
        let first = self.split_at(range.start);
        self.compute_positions();
        let last = self.split_at(range.end);
        self.compute_positions();
        first..last
    }

    // ─── Insertion ────────────────────────────────────────────────────────

    /// Insert plain text. It joins the range containing `position`; at a
    /// boundary, the range ending there.
    pub fn insert(&mut self, text: &str, position: usize) {
        if text.is_empty() {
            return;
        }
        let position = self.clamp(position);
        let Some(index) = self.range_index_at(position) else {
            self.ranges.push(TextRange::new(text, Vec::new()));
            self.flatten();
            return;
        };
        let range = &mut self.ranges[index];
        let cut = byte_offset(&range.string, position - range.position);
        range.string.insert_str(cut, text);
        self.compute_positions();
        self.flatten();
    }

    /// Insert text carrying its own attributes.
    pub fn insert_with_attributes(
        &mut self,
        text: &str,
        position: usize,
        attributes: Vec<Attribute>,
    ) {
        if text.is_empty() {
            return;
        }
        let position = self.clamp(position);
        let index = self.split_at(position);
        self.ranges
            .insert(index, TextRange::new(text, dedup(attributes)));
        self.compute_positions();
        self.flatten();
    }

    /// Insert every range of another text, keeping its attributes.
    pub fn insert_text(&mut self, other: &RichText, position: usize) {
        let mut position = self.clamp(position);
        for range in &other.ranges {
            self.insert_with_attributes(&range.string, position, range.attributes.clone());
            position += range.len();
        }
    }

    pub fn append(&mut self, text: &str) {
        let end = self.len();
        self.insert(text, end);
    }

    pub fn append_with_attributes(&mut self, text: &str, attributes: Vec<Attribute>) {
        if text.is_empty() {
            return;
        }
        self.ranges.push(TextRange::new(text, dedup(attributes)));
        self.compute_positions();
        self.flatten();
    }

    pub fn append_text(&mut self, other: &RichText) {
        for range in &other.ranges {
            self.append_with_attributes(&range.string, range.attributes.clone());
        }
    }

    // ─── Removal ──────────────────────────────────────────────────────────

    /// Remove `count` chars starting at `position`.
    pub fn remove(&mut self, count: usize, position: usize) {
        if count == 0 {
            return;
        }
        let start = self.clamp(position);
        let span = self.split_span(start..start.saturating_add(count));
        self.ranges.drain(span);
        if self.ranges.is_empty() {
            self.ranges.push(TextRange::default());
        }
        self.compute_positions();
        self.flatten();
    }

    /// Remove a char range. Removing everything leaves one empty range.
    pub fn remove_subrange(&mut self, range: Range<usize>) {
        let range = self.clamp_range(range);
        if range == self.whole_range() {
            self.ranges = vec![TextRange::default()];
            return;
        }
        self.remove(range.end - range.start, range.start);
    }

    pub fn remove_first(&mut self, count: usize) {
        let count = count.min(self.len());
        self.remove(count, 0);
    }

    pub fn remove_last(&mut self, count: usize) {
        let len = self.len();
        let count = count.min(len);
        self.remove(count, len - count);
    }

    pub fn replace_subrange(&mut self, range: Range<usize>, text: &str) {
        let range = self.clamp_range(range);
        let start = range.start;
        self.remove_subrange(range);
        self.insert(text, start);
    }

    // ─── Extraction ───────────────────────────────────────────────────────

    /// Independent copy of a sub-range.
    pub fn extract(&self, range: Range<usize>) -> RichText {
        let range = self.clamp_range(range);
        let mut copy = self.clone();
        let tail = copy.len() - range.end;
        copy.remove_last(tail);
        copy.remove_first(range.start);
        copy
    }

    pub fn prefix(&self, count: usize) -> RichText {
        self.extract(0..count)
    }

    pub fn suffix(&self, count: usize) -> RichText {
        let len = self.len();
        self.extract(len.saturating_sub(count)..len)
    }

    /// Plain text of a char range.
    pub fn substring(&self, range: Range<usize>) -> String {
        let range = self.clamp_range(range);
        self.text()
            .chars()
            .skip(range.start)
            .take(range.end - range.start)
            .collect()
    }

    // ─── Attributes ───────────────────────────────────────────────────────

    pub fn add_attributes(&mut self, attributes: &[Attribute], range: Range<usize>) {
        let span = self.split_span(range);
        for range in &mut self.ranges[span] {
            for attribute in attributes {
                if !range.attributes.contains(attribute) {
                    range.attributes.push(attribute.clone());
                }
            }
        }
        self.flatten();
    }

    pub fn set_attributes(&mut self, attributes: &[Attribute], range: Range<usize>) {
        let span = self.split_span(range);
        let attributes = dedup(attributes.to_vec());
        for range in &mut self.ranges[span] {
            range.attributes = attributes.clone();
        }
        self.flatten();
    }

    /// Remove attributes by kind: removing `Link("a")` also drops `Link("b")`.
    pub fn remove_attributes(&mut self, attributes: &[Attribute], range: Range<usize>) {
        let kinds: Vec<&str> = attributes.iter().map(Attribute::kind_name).collect();
        let span = self.split_span(range);
        for range in &mut self.ranges[span] {
            range
                .attributes
                .retain(|attr| !kinds.contains(&attr.kind_name()));
        }
        self.flatten();
    }

    /// Whether any part of `range` carries an attribute of the same kind.
    pub fn range_contains_attribute(&self, range: Range<usize>, attribute: &Attribute) -> bool {
        self.extract(range).ranges.iter().any(|r| {
            r.attributes
                .iter()
                .any(|a| a.kind_name() == attribute.kind_name())
        })
    }

    /// Toggle an attribute over `range`. Returns true when it was added.
    pub fn toggle_attribute(&mut self, attribute: Attribute, range: Range<usize>) -> bool {
        if self.range_contains_attribute(range.clone(), &attribute) {
            self.remove_attributes(&[attribute], range);
            false
        } else {
            self.add_attributes(&[attribute], range);
            true
        }
    }

    // ─── Links ────────────────────────────────────────────────────────────

    /// External link targets, in order.
    pub fn links(&self) -> Vec<String> {
        self.ranges
            .iter()
            .flat_map(|r| r.attributes.iter())
            .filter_map(|a| match a {
                Attribute::Link(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Titles of linked notes, in order. Adjacent ranges linking the same
    /// note count as one link.
    pub fn internal_links(&self) -> Vec<String> {
        let mut links: Vec<(usize, String)> = Vec::new();
        for (index, range) in self.ranges.iter().enumerate() {
            let Some(title) = range.internal_link() else {
                continue;
            };
            match links.last_mut() {
                Some((end, last)) if *end == index && last == title => *end = index + 1,
                _ => links.push((index + 1, title.to_string())),
            }
        }
        links.into_iter().map(|(_, title)| title).collect()
    }

    /// Index spans of adjacent ranges carrying an internal link to `title`.
    fn link_runs_to(&self, title: &str) -> Vec<Range<usize>> {
        let mut runs: Vec<Range<usize>> = Vec::new();
        for (index, range) in self.ranges.iter().enumerate() {
            let links_here = range.attributes.iter().any(|attr| {
                matches!(attr, Attribute::InternalLink(t) if references::same_title(t, title))
            });
            if !links_here {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.end == index => run.end = index + 1,
                _ => runs.push(index..index + 1),
            }
        }
        runs
    }

    /// Replace the char span with a single range linking to `title`. Only
    /// formatting shared by the whole span is kept.
    fn collapse_into_link(&mut self, span: Range<usize>, title: String) {
        let indices = self.split_span(span);
        if indices.is_empty() {
            return;
        }
        let slice = &self.ranges[indices.clone()];
        let mut attributes = slice[0].attributes.clone();
        attributes.retain(|attr| slice.iter().all(|r| r.attributes.contains(attr)));
        attributes.push(Attribute::InternalLink(title));
        let string: String = slice.iter().map(|r| r.string.as_str()).collect();
        self.ranges
            .splice(indices, [TextRange::new(string, attributes)]);
        self.compute_positions();
    }

    /// Ranges carrying a link or internal link.
    pub fn link_ranges(&self) -> Vec<TextRange> {
        self.ranges.iter().filter(|r| r.is_link()).cloned().collect()
    }

    /// Whether this text links to the note with `title` (case-insensitive).
    pub fn has_link_to_note(&self, title: &str) -> bool {
        self.ranges
            .iter()
            .filter_map(TextRange::internal_link)
            .any(|t| references::same_title(t, title))
    }

    /// Whether this text links to or mentions `title`.
    pub fn has_reference_to_note(&self, title: &str) -> bool {
        self.has_link_to_note(title)
            || !references::title_occurrences(&self.text(), title, true).is_empty()
    }

    /// Turn every internal link to `title` into plain text. Returns true
    /// when something changed.
    pub fn unlink_note(&mut self, title: &str) -> bool {
        let mut changed = false;
        for range in &mut self.ranges {
            let before = range.attributes.len();
            range.attributes.retain(|attr| match attr {
                Attribute::InternalLink(t) => !references::same_title(t, title),
                _ => true,
            });
            changed |= range.attributes.len() != before;
        }
        if changed {
            self.flatten();
        }
        changed
    }

    /// Point internal links at `old` to `new`, also rewriting link text that
    /// spelled the old title. Returns true when something changed.
    pub fn rename_internal_links(&mut self, old: &str, new: &str) -> bool {
        let runs = self.link_runs_to(old);
        if runs.is_empty() {
            return false;
        }
        for run in runs {
            let spelled: String = self.ranges[run.clone()]
                .iter()
                .map(|r| r.string.as_str())
                .collect();
            let respell = references::same_title(&spelled, old);
            for (offset, range) in self.ranges[run].iter_mut().enumerate() {
                for attr in &mut range.attributes {
                    if let Attribute::InternalLink(t) = attr {
                        if references::same_title(t, old) {
                            *t = new.to_string();
                        }
                    }
                }
                if respell {
                    if offset == 0 {
                        range.string = new.to_string();
                    } else {
                        range.string.clear();
                    }
                }
            }
        }
        self.compute_positions();
        self.flatten();
        true
    }

    /// Mark literal, whole-word occurrences of the given note titles as
    /// internal links. Spans already carrying a link are left alone. Returns
    /// the number of spans linked.
    pub fn fold_internal_links<S: AsRef<str>>(&mut self, titles: &[S]) -> usize {
        let plain = self.text();
        let mut candidates: Vec<(Range<usize>, String)> = Vec::new();
        for title in titles {
            let title = title.as_ref();
            for span in references::title_occurrences(&plain, title, false) {
                candidates.push((span, title.to_string()));
            }
        }
        if candidates.is_empty() {
            return 0;
        }
        // Longest titles first so "Rust Book" wins over "Rust".
        candidates.sort_by(|a, b| {
            (b.0.end - b.0.start)
                .cmp(&(a.0.end - a.0.start))
                .then(a.0.start.cmp(&b.0.start))
        });

        self.silently(|text| {
            let mut folded = 0;
            let mut taken: Vec<Range<usize>> = Vec::new();
            for (span, title) in candidates {
                if taken.iter().any(|t| t.start < span.end && span.start < t.end) {
                    continue;
                }
                if text.span_has_link(span.clone()) {
                    continue;
                }
                text.collapse_into_link(span.clone(), title);
                taken.push(span);
                folded += 1;
            }
            folded
        })
    }

    fn span_has_link(&self, span: Range<usize>) -> bool {
        self.ranges
            .iter()
            .any(|r| r.is_link() && r.position < span.end && span.start < r.end())
    }

    /// Char spans carrying a link, used to exclude already linked mentions.
    pub fn link_spans(&self) -> Vec<Range<usize>> {
        self.ranges
            .iter()
            .filter(|r| r.is_link())
            .map(TextRange::span)
            .collect()
    }

    /// Number of whitespace-separated words.
    pub fn word_count(&self) -> usize {
        self.text().split_whitespace().count()
    }
}

fn dedup(attributes: Vec<Attribute>) -> Vec<Attribute> {
    let mut unique: Vec<Attribute> = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        if !unique.contains(&attribute) {
            unique.push(attribute);
        }
    }
    unique
}
