//! Element tree: the content nodes ("bullets") of a note.
//!
//! Every element exclusively owns its children, so a node can only ever sit
//! under one parent; moving a node means taking it out of the tree and
//! inserting it elsewhere. Parent, depth and index-path lookups are queries
//! answered from an ancestor.
//!
//! Mutators record a [`ChangeKind`] in the element's change log. The owner
//! of the tree drains those logs (see [`crate::note::Note::take_changes`])
//! and decides whether to publish them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::defaults;
use crate::references::{self, UnlinkedMention, UnlinkedReferences};
use crate::text::RichText;

/// What kind of mutation an element went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Text content changed.
    Text,
    /// Scalar metadata changed (flags, kind, dates, identity).
    Meta,
    /// Children were added, removed or reordered.
    Tree,
}

/// A recorded change, attributed to the element it happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementChange {
    pub element_id: Uuid,
    pub kind: ChangeKind,
}

// =============================================================================
// KIND
// =============================================================================

/// Size hints for media elements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDisplay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_ratio: Option<f64>,
}

impl MediaDisplay {
    fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

/// Presentation kind of an element.
///
/// Kinds this engine does not know are kept as [`ElementKind::Other`] with
/// every field, so they survive a decode and re-encode unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "KindFields", into = "KindFields")]
pub enum ElementKind {
    #[default]
    Bullet,
    /// Level between 1 and [`defaults::MAX_HEADING_LEVEL`].
    Heading(u8),
    Quote {
        level: u8,
        title: Option<String>,
        source: Option<String>,
    },
    Check(bool),
    Code,
    Divider,
    /// Stored image, by id.
    Image { id: Uuid, display: MediaDisplay },
    /// Embedded remote content.
    Embed { url: String, display: MediaDisplay },
    /// Live copy of an element of another note.
    BlockReference { note_id: Uuid, element_id: Uuid },
    DailySummary,
    TabGroup(Uuid),
    Other {
        kind: String,
        fields: Map<String, Value>,
    },
}

impl ElementKind {
    /// Heading with the level clamped to the supported range.
    pub fn heading(level: u8) -> Self {
        ElementKind::Heading(level.clamp(1, defaults::MAX_HEADING_LEVEL))
    }

    pub fn is_bullet(&self) -> bool {
        matches!(self, ElementKind::Bullet)
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, ElementKind::Heading(_))
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ElementKind::Image { .. } | ElementKind::Embed { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            ElementKind::Bullet => "bullet",
            ElementKind::Heading(_) => "heading",
            ElementKind::Quote { .. } => "quote",
            ElementKind::Check(_) => "check",
            ElementKind::Code => "code",
            ElementKind::Divider => "divider",
            ElementKind::Image { .. } => "image",
            ElementKind::Embed { .. } => "embed",
            ElementKind::BlockReference { .. } => "blockReference",
            ElementKind::DailySummary => "dailySummary",
            ElementKind::TabGroup(_) => "tabGroup",
            ElementKind::Other { kind, .. } => kind,
        }
    }
}

/// Persisted shape of a kind: a `type` tag plus loose fields.
#[derive(Serialize, Deserialize)]
struct KindFields {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl KindFields {
    fn string(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// `level`, clamped to `1..=max`.
    fn level(&self, max: u8) -> u8 {
        let level = self.fields.get("level").and_then(Value::as_u64).unwrap_or(1);
        level.clamp(1, u64::from(max)) as u8
    }

    fn uuid(&self, key: &str) -> Result<Uuid, String> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| format!("{} element without a valid '{key}' id", self.kind))
    }

    /// Newer documents carry `displayInfos`, older ones a bare `sizeRatio`.
    fn display(&self) -> MediaDisplay {
        if let Some(infos) = self.fields.get("displayInfos") {
            if let Ok(display) = serde_json::from_value(infos.clone()) {
                return display;
            }
        }
        MediaDisplay {
            display_ratio: self.fields.get("sizeRatio").and_then(Value::as_f64),
            ..MediaDisplay::default()
        }
    }

    fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    fn set_display(&mut self, display: MediaDisplay) {
        if !display.is_unset() {
            if let Ok(value) = serde_json::to_value(display) {
                self.set("displayInfos", value);
            }
        }
    }
}

impl From<ElementKind> for KindFields {
    fn from(kind: ElementKind) -> Self {
        let mut raw = KindFields {
            kind: kind.name().to_string(),
            fields: Map::new(),
        };
        match kind {
            ElementKind::Heading(level) => raw.set("level", level),
            ElementKind::Quote {
                level,
                title,
                source,
            } => {
                raw.set("level", level);
                if let Some(title) = title {
                    raw.set("title", title);
                }
                if let Some(source) = source {
                    raw.set("source", source);
                }
            }
            ElementKind::Check(checked) => raw.set("value", checked),
            ElementKind::Image { id, display } => {
                raw.set("source", id.to_string());
                raw.set_display(display);
            }
            ElementKind::Embed { url, display } => {
                raw.set("source", url);
                raw.set_display(display);
            }
            ElementKind::BlockReference {
                note_id,
                element_id,
            } => {
                raw.set("title", note_id.to_string());
                raw.set("source", element_id.to_string());
            }
            ElementKind::TabGroup(id) => raw.set("tabGroupId", id.to_string()),
            ElementKind::Other { fields, .. } => raw.fields = fields,
            ElementKind::Bullet
            | ElementKind::Code
            | ElementKind::Divider
            | ElementKind::DailySummary => {}
        }
        raw
    }
}

impl TryFrom<KindFields> for ElementKind {
    type Error = String;

    fn try_from(raw: KindFields) -> Result<Self, Self::Error> {
        Ok(match raw.kind.as_str() {
            "bullet" => ElementKind::Bullet,
            "heading" => ElementKind::Heading(raw.level(defaults::MAX_HEADING_LEVEL)),
            "quote" => ElementKind::Quote {
                level: raw.level(u8::MAX),
                title: raw.string("title"),
                source: raw.string("source"),
            },
            "check" => ElementKind::Check(
                raw.fields.get("value").and_then(Value::as_bool).unwrap_or(false),
            ),
            "code" => ElementKind::Code,
            "divider" => ElementKind::Divider,
            "image" => ElementKind::Image {
                id: raw.uuid("source")?,
                display: raw.display(),
            },
            "embed" => ElementKind::Embed {
                url: raw
                    .string("source")
                    .ok_or_else(|| "embed element without a source url".to_string())?,
                display: raw.display(),
            },
            "blockReference" => ElementKind::BlockReference {
                note_id: raw.uuid("title")?,
                element_id: raw.uuid("source")?,
            },
            "dailySummary" => ElementKind::DailySummary,
            "tabGroup" => ElementKind::TabGroup(raw.uuid("tabGroupId")?),
            _ => ElementKind::Other {
                kind: raw.kind,
                fields: raw.fields,
            },
        })
    }
}

/// How children of an element are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildrenFormat {
    #[default]
    Bullet,
    Numbered,
}

impl ChildrenFormat {
    pub fn is_bullet(&self) -> bool {
        matches!(self, ChildrenFormat::Bullet)
    }
}

// =============================================================================
// ELEMENT
// =============================================================================

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &f32) -> bool {
    *value == 0.0
}

/// Accept either a rich text object or a bare string.
fn deserialize_text<'de, D>(deserializer: D) -> Result<RichText, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextRepr {
        Rich(RichText),
        Plain(String),
    }

    Ok(match TextRepr::deserialize(deserializer)? {
        TextRepr::Rich(text) => text,
        TextRepr::Plain(text) => RichText::new(text),
    })
}

/// A node of a note's content tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub(crate) id: Uuid,
    #[serde(
        default,
        skip_serializing_if = "RichText::is_empty",
        deserialize_with = "deserialize_text"
    )]
    pub(crate) text: RichText,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub(crate) open: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub(crate) read_only: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub(crate) score: f32,
    #[serde(default = "Utc::now")]
    pub(crate) creation_date: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub(crate) update_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) children: Vec<Element>,
    #[serde(default, skip_serializing_if = "ElementKind::is_bullet")]
    pub(crate) kind: ElementKind,
    #[serde(default, skip_serializing_if = "ChildrenFormat::is_bullet")]
    pub(crate) children_format: ChildrenFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) query: Option<String>,
    #[serde(skip)]
    pub(crate) changes: Vec<ChangeKind>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.text == other.text
            && self.open == other.open
            && self.read_only == other.read_only
            && self.score == other.score
            && self.creation_date == other.creation_date
            && self.update_date == other.update_date
            && self.kind == other.kind
            && self.children_format == other.children_format
            && self.query == other.query
            && self.children == other.children
    }
}

impl Default for Element {
    fn default() -> Self {
        Self::with_id(Uuid::new_v4())
    }
}

/// Scalar fields of an element, everything except identity and children.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementFields {
    pub text: RichText,
    pub open: bool,
    pub read_only: bool,
    pub score: f32,
    pub creation_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    pub kind: ElementKind,
    pub children_format: ChildrenFormat,
    pub query: Option<String>,
}

impl Element {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            text: RichText::default(),
            open: true,
            read_only: false,
            score: 0.0,
            creation_date: now,
            update_date: now,
            children: Vec::new(),
            kind: ElementKind::Bullet,
            children_format: ChildrenFormat::Bullet,
            query: None,
            changes: Vec::new(),
        }
    }

    pub fn with_text(text: impl Into<RichText>) -> Self {
        let mut element = Self::new();
        element.text = text.into();
        element
    }

    /// Builder form of [`Element::add_child`] for constructing trees.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &RichText {
        &self.text
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn update_date(&self) -> DateTime<Utc> {
        self.update_date
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn children_format(&self) -> ChildrenFormat {
        self.children_format
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn is_header(&self) -> bool {
        self.kind.is_heading()
    }

    pub fn fields(&self) -> ElementFields {
        ElementFields {
            text: self.text.clone(),
            open: self.open,
            read_only: self.read_only,
            score: self.score,
            creation_date: self.creation_date,
            update_date: self.update_date,
            kind: self.kind.clone(),
            children_format: self.children_format,
            query: self.query.clone(),
        }
    }

    /// Overwrite every scalar field verbatim. Nothing is recorded.
    pub(crate) fn apply_fields(&mut self, fields: ElementFields) {
        self.text = fields.text;
        self.open = fields.open;
        self.read_only = fields.read_only;
        self.score = fields.score;
        self.creation_date = fields.creation_date;
        self.update_date = fields.update_date;
        self.kind = fields.kind;
        self.children_format = fields.children_format;
        self.query = fields.query;
    }

    // ─── Change log ───────────────────────────────────────────────────────

    pub(crate) fn record(&mut self, kind: ChangeKind) {
        self.update_date = Utc::now();
        self.changes.push(kind);
    }

    /// Whether this element or a descendant has unrecorded-by-owner changes.
    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty() || self.children.iter().any(Element::has_pending_changes)
    }

    /// Drain change logs into `out`, depth first. Ancestors of a changed
    /// element get their update date bumped. Returns true if anything in
    /// this subtree changed.
    pub(crate) fn drain_changes(&mut self, out: &mut Vec<ElementChange>) -> bool {
        let id = self.id;
        let mut changed = false;
        for kind in self.changes.drain(..) {
            out.push(ElementChange {
                element_id: id,
                kind,
            });
            changed = true;
        }
        let mut child_changed = false;
        for child in &mut self.children {
            child_changed |= child.drain_changes(out);
        }
        if child_changed {
            self.update_date = Utc::now();
        }
        changed || child_changed
    }

    /// Drop recorded changes in this subtree without touching dates.
    pub(crate) fn clear_changes(&mut self) {
        self.changes.clear();
        for child in &mut self.children {
            child.clear_changes();
        }
    }

    // ─── Scalar mutators ──────────────────────────────────────────────────

    pub fn set_text(&mut self, text: impl Into<RichText>) {
        self.text = text.into();
        self.record(ChangeKind::Text);
    }

    /// Edit the text in place.
    pub fn edit_text<R>(&mut self, f: impl FnOnce(&mut RichText) -> R) -> R {
        let result = f(&mut self.text);
        self.record(ChangeKind::Text);
        result
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
        self.record(ChangeKind::Meta);
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
        self.record(ChangeKind::Meta);
    }

    pub fn set_score(&mut self, score: f32) {
        self.score = score;
        self.record(ChangeKind::Meta);
    }

    pub fn set_kind(&mut self, kind: ElementKind) {
        self.kind = kind;
        self.record(ChangeKind::Meta);
    }

    pub fn set_children_format(&mut self, format: ChildrenFormat) {
        self.children_format = format;
        self.record(ChangeKind::Meta);
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query;
        self.record(ChangeKind::Meta);
    }

    pub fn set_creation_date(&mut self, date: DateTime<Utc>) {
        self.creation_date = date;
        self.record(ChangeKind::Meta);
    }

    // ─── Children ─────────────────────────────────────────────────────────

    pub fn index_of_child(&self, id: Uuid) -> Option<usize> {
        self.children.iter().position(|c| c.id == id)
    }

    /// Append a child.
    pub fn add_child(&mut self, child: Element) {
        let after = self.children.last().map(|c| c.id);
        self.insert_after(child, after);
    }

    pub fn add_children(&mut self, children: impl IntoIterator<Item = Element>) {
        for child in children {
            self.add_child(child);
        }
    }

    /// Insert `child` right after the sibling `after`. With no sibling, or
    /// one that is not a child of this element, the child goes first.
    pub fn insert_after(&mut self, child: Element, after: Option<Uuid>) {
        self.detach_child_id(child.id);
        let index = after
            .and_then(|after| self.index_of_child(after))
            .map_or(0, |i| i + 1);
        self.children.insert(index, child);
        self.record(ChangeKind::Tree);
    }

    /// Insert `child` at `index`, clamped to the child count. A child with
    /// the same id already under this element is moved.
    pub fn insert_at(&mut self, child: Element, index: usize) {
        self.detach_child_id(child.id);
        let index = index.min(self.children.len());
        self.children.insert(index, child);
        self.record(ChangeKind::Tree);
    }

    fn detach_child_id(&mut self, id: Uuid) {
        if let Some(index) = self.index_of_child(id) {
            self.children.remove(index);
        }
    }

    /// Remove a direct child.
    pub fn remove_child(&mut self, id: Uuid) -> Option<Element> {
        let index = self.index_of_child(id)?;
        let child = self.children.remove(index);
        self.record(ChangeKind::Tree);
        Some(child)
    }

    /// Remove all children and hand them back.
    pub fn clear_children(&mut self) -> Vec<Element> {
        let children = std::mem::take(&mut self.children);
        self.record(ChangeKind::Tree);
        children
    }

    // ─── Tree queries ─────────────────────────────────────────────────────

    /// Depth-first search over the subtree, self included.
    pub fn find(&self, id: Uuid) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Like [`Element::find`] but does not descend into closed elements.
    pub fn find_visible(&self, id: Uuid) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        if !self.open {
            return None;
        }
        self.children.iter().find_map(|c| c.find_visible(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.find(id).is_some()
    }

    /// All descendants in depth-first pre-order, self excluded.
    pub fn flat_elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.flat_elements());
        }
        out
    }

    /// Ids of the whole subtree, self included.
    pub fn subtree_ids(&self) -> Vec<Uuid> {
        let mut ids = vec![self.id];
        for child in &self.children {
            ids.extend(child.subtree_ids());
        }
        ids
    }

    pub fn parent_of(&self, id: Uuid) -> Option<&Element> {
        if self.index_of_child(id).is_some() {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.parent_of(id))
    }

    fn parent_of_mut(&mut self, id: Uuid) -> Option<&mut Element> {
        if self.index_of_child(id).is_some() {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.parent_of_mut(id))
    }

    /// Child indices leading from this element to `id`. Empty for self.
    pub fn index_path(&self, id: Uuid) -> Option<Vec<usize>> {
        if self.id == id {
            return Some(Vec::new());
        }
        self.children.iter().enumerate().find_map(|(i, c)| {
            c.index_path(id).map(|mut path| {
                path.insert(0, i);
                path
            })
        })
    }

    /// Distance from this element to `id`.
    pub fn depth_of(&self, id: Uuid) -> Option<usize> {
        self.index_path(id).map(|path| path.len())
    }

    pub fn next_sibling(&self, id: Uuid) -> Option<&Element> {
        let parent = self.parent_of(id)?;
        let index = parent.index_of_child(id)?;
        parent.children.get(index + 1)
    }

    pub fn previous_sibling(&self, id: Uuid) -> Option<&Element> {
        let parent = self.parent_of(id)?;
        let index = parent.index_of_child(id)?;
        index.checked_sub(1).and_then(|i| parent.children.get(i))
    }

    /// Last element of the deepest last-child chain.
    pub fn deepest_last(&self) -> &Element {
        match self.children.last() {
            Some(last) => last.deepest_last(),
            None => self,
        }
    }

    /// Detach the element `id` from wherever it sits below this element.
    pub fn remove_element(&mut self, id: Uuid) -> Option<Element> {
        self.parent_of_mut(id)?.remove_child(id)
    }

    /// Move `id` under `new_parent` at `index`. Refuses to move an element
    /// into its own subtree. Returns false when nothing moved.
    pub fn move_element(&mut self, id: Uuid, new_parent: Uuid, index: usize) -> bool {
        if id == self.id {
            return false;
        }
        let Some(moving) = self.find(id) else {
            return false;
        };
        if moving.contains(new_parent) || !self.contains(new_parent) {
            return false;
        }
        let Some(element) = self.remove_element(id) else {
            return false;
        };
        match self.find_mut(new_parent) {
            Some(parent) => {
                parent.insert_at(element, index);
                true
            }
            None => false,
        }
    }

    // ─── Copies ───────────────────────────────────────────────────────────

    /// Deep copy. With `new_ids` every element of the copy gets a fresh id.
    pub fn deep_copy(&self, new_ids: bool) -> Element {
        let mut copy = self.clone();
        copy.changes.clear();
        if new_ids {
            copy.reset_ids();
        }
        copy
    }

    /// Give this element and all descendants fresh ids.
    pub fn reset_ids(&mut self) {
        self.id = Uuid::new_v4();
        self.record(ChangeKind::Meta);
        for child in &mut self.children {
            child.reset_ids();
        }
    }

    /// Index of the subtree by id, for identity matching.
    pub fn index_by_id(&self) -> HashMap<Uuid, &Element> {
        let mut index = HashMap::new();
        index.insert(self.id, self);
        for child in &self.children {
            index.extend(child.index_by_id());
        }
        index
    }

    // ─── Links and references ─────────────────────────────────────────────

    /// External links in the subtree.
    pub fn out_links(&self) -> Vec<String> {
        let mut links = self.text.links();
        for child in &self.children {
            links.extend(child.out_links());
        }
        links
    }

    /// Titles of notes linked from the subtree.
    pub fn internal_links(&self) -> Vec<String> {
        let mut links = self.text.internal_links();
        for child in &self.children {
            links.extend(child.internal_links());
        }
        links
    }

    pub fn element_containing_link(&self, link: &str) -> Option<&Element> {
        if self.text.links().iter().any(|l| l == link) {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|c| c.element_containing_link(link))
    }

    pub fn element_containing_source(&self, source: &str) -> Option<&Element> {
        if self
            .text
            .ranges()
            .iter()
            .any(|r| r.source() == Some(source))
        {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|c| c.element_containing_source(source))
    }

    pub fn element_containing_text(&self, text: &str) -> Option<&Element> {
        if self.text.text() == text {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|c| c.element_containing_text(text))
    }

    pub fn has_link_to_note(&self, title: &str) -> bool {
        self.text.has_link_to_note(title)
    }

    pub fn has_reference_to_note(&self, title: &str) -> bool {
        self.text.has_reference_to_note(title)
    }

    /// Unlinked mentions of `titles` in this element's own text.
    pub fn unlinked_references<S: AsRef<str>>(&self, titles: &[S]) -> UnlinkedReferences {
        let mut found = UnlinkedReferences::new();
        for title in titles {
            let title = title.as_ref();
            let spans = references::unlinked_spans(&self.text, title);
            if !spans.is_empty() {
                found.entry(title.to_string()).or_default().push(UnlinkedMention {
                    element_id: self.id,
                    spans,
                });
            }
        }
        found
    }

    /// Unlinked mentions over the whole subtree, merged by title.
    pub fn deep_unlinked_references<S: AsRef<str>>(&self, titles: &[S]) -> UnlinkedReferences {
        let mut found = self.unlinked_references(titles);
        for child in &self.children {
            references::merge_unlinked(&mut found, child.deep_unlinked_references(titles));
        }
        found
    }

    /// Remove internal links to `title` in the subtree. Returns how many
    /// elements changed.
    pub fn unlink_note(&mut self, title: &str) -> usize {
        let mut count = 0;
        if self.text.unlink_note(title) {
            self.record(ChangeKind::Text);
            count += 1;
        }
        for child in &mut self.children {
            count += child.unlink_note(title);
        }
        count
    }

    /// Retarget internal links from `old` to `new` in the subtree. Returns
    /// how many elements changed.
    pub fn rename_internal_links(&mut self, old: &str, new: &str) -> usize {
        let mut count = 0;
        if self.text.rename_internal_links(old, new) {
            self.record(ChangeKind::Text);
            count += 1;
        }
        for child in &mut self.children {
            count += child.rename_internal_links(old, new);
        }
        count
    }

    /// Link literal mentions of `titles` across the subtree.
    pub fn fold_internal_links<S: AsRef<str>>(&mut self, titles: &[S]) -> usize {
        let mut folded = self.text.fold_internal_links(titles);
        if folded > 0 {
            self.record(ChangeKind::Text);
        }
        for child in &mut self.children {
            folded += child.fold_internal_links(titles);
        }
        folded
    }

    /// Words in the subtree.
    pub fn word_count(&self) -> usize {
        self.text.word_count() + self.children.iter().map(Element::word_count).sum::<usize>()
    }

    /// Whether the subtree holds no text at all.
    pub fn is_empty_subtree(&self) -> bool {
        self.text.is_empty() && self.children.iter().all(Element::is_empty_subtree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Attribute;

    fn tree() -> (Element, Uuid, Uuid, Uuid) {
        let a = Element::with_text("a");
        let b = Element::with_text("b");
        let c = Element::with_text("c");
        let (ia, ib, ic) = (a.id, b.id, c.id);
        let root = Element::new().child(a.child(c)).child(b);
        (root, ia, ib, ic)
    }

    #[test]
    fn test_add_child_appends() {
        let mut root = Element::new();
        let first = Element::with_text("1");
        let second = Element::with_text("2");
        let (f, s) = (first.id, second.id);
        root.add_child(first);
        root.add_child(second);
        assert_eq!(root.children().iter().map(|c| c.id()).collect::<Vec<_>>(), vec![f, s]);
        assert!(root.has_pending_changes());
    }

    #[test]
    fn test_insert_after_none_goes_first() {
        let (mut root, ia, ib, _) = tree();
        let new = Element::with_text("new");
        let id = new.id;
        root.insert_after(new, None);
        assert_eq!(root.children()[0].id(), id);
        assert_eq!(root.children()[1].id(), ia);
        assert_eq!(root.children()[2].id(), ib);
    }

    #[test]
    fn test_insert_after_missing_sibling_goes_first() {
        let (mut root, _, _, _) = tree();
        let new = Element::with_text("new");
        let id = new.id;
        root.insert_after(new, Some(Uuid::new_v4()));
        assert_eq!(root.children()[0].id(), id);
    }

    #[test]
    fn test_insert_after_sibling() {
        let (mut root, ia, ib, _) = tree();
        let new = Element::with_text("new");
        let id = new.id;
        root.insert_after(new, Some(ia));
        let ids: Vec<Uuid> = root.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![ia, id, ib]);
    }

    #[test]
    fn test_insert_at_moves_existing_child() {
        let (mut root, ia, ib, _) = tree();
        let a = root.find(ia).cloned().unwrap();
        root.insert_at(a, 5);
        let ids: Vec<Uuid> = root.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![ib, ia]);
    }

    #[test]
    fn test_find_and_queries() {
        let (root, ia, ib, ic) = tree();
        assert_eq!(root.find(ic).unwrap().text().text(), "c");
        assert!(root.find(Uuid::new_v4()).is_none());
        assert_eq!(root.parent_of(ic).unwrap().id(), ia);
        assert_eq!(root.parent_of(ia).unwrap().id(), root.id());
        assert_eq!(root.depth_of(ic), Some(2));
        assert_eq!(root.depth_of(root.id()), Some(0));
        assert_eq!(root.index_path(ic), Some(vec![0, 0]));
        assert_eq!(root.index_path(ib), Some(vec![1]));
        assert_eq!(root.next_sibling(ia).unwrap().id(), ib);
        assert!(root.next_sibling(ib).is_none());
        assert_eq!(root.previous_sibling(ib).unwrap().id(), ia);
        assert!(root.previous_sibling(ia).is_none());
        assert_eq!(root.deepest_last().id(), ib);
        assert_eq!(root.flat_elements().len(), 3);
    }

    #[test]
    fn test_find_visible_skips_closed() {
        let (mut root, ia, _, ic) = tree();
        root.find_mut(ia).unwrap().set_open(false);
        assert!(root.find_visible(ic).is_none());
        assert!(root.find(ic).is_some());
    }

    #[test]
    fn test_remove_element_anywhere() {
        let (mut root, ia, _, ic) = tree();
        let removed = root.remove_element(ic).unwrap();
        assert_eq!(removed.text().text(), "c");
        assert!(root.find(ia).unwrap().children().is_empty());
        assert!(root.remove_element(ic).is_none());
    }

    #[test]
    fn test_move_element() {
        let (mut root, ia, ib, ic) = tree();
        assert!(root.move_element(ic, ib, 0));
        assert_eq!(root.parent_of(ic).unwrap().id(), ib);
        // An element cannot move into its own subtree.
        assert!(!root.move_element(ib, ic, 0));
        assert!(!root.move_element(ia, Uuid::new_v4(), 0));
        assert_eq!(root.flat_elements().len(), 3);
    }

    #[test]
    fn test_deep_copy_new_ids() {
        let (root, ia, _, _) = tree();
        let copy = root.deep_copy(true);
        assert_ne!(copy.id(), root.id());
        assert!(copy.find(ia).is_none());
        assert_eq!(copy.flat_elements().len(), 3);

        let same = root.deep_copy(false);
        assert_eq!(same, root);
    }

    #[test]
    fn test_drain_changes_bumps_ancestors() {
        let (mut root, ia, _, ic) = tree();
        root.clear_changes();
        let before = root.update_date();
        std::thread::sleep(std::time::Duration::from_millis(2));
        root.find_mut(ic).unwrap().set_text("changed");
        let mut changes = Vec::new();
        assert!(root.drain_changes(&mut changes));
        assert_eq!(
            changes,
            vec![ElementChange {
                element_id: ic,
                kind: ChangeKind::Text
            }]
        );
        assert!(root.update_date() > before);
        assert!(root.find(ia).unwrap().update_date() > before);
        assert!(!root.has_pending_changes());
    }

    #[test]
    fn test_clear_changes_keeps_dates() {
        let (mut root, _, _, ic) = tree();
        root.clear_changes();
        let before = root.update_date();
        root.find_mut(ic).unwrap().set_text("x");
        root.clear_changes();
        assert_eq!(root.update_date(), before);
        assert!(!root.has_pending_changes());
    }

    #[test]
    fn test_serialization_skips_defaults() {
        let element = Element::with_text("");
        let json = serde_json::to_value(&element).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("creationDate"));
        assert!(!obj.contains_key("text"));
        assert!(!obj.contains_key("open"));
        assert!(!obj.contains_key("readOnly"));
        assert!(!obj.contains_key("kind"));
        assert!(!obj.contains_key("childrenFormat"));
        assert!(!obj.contains_key("children"));
    }

    #[test]
    fn test_serialization_writes_non_defaults() {
        let mut element = Element::with_text("hi");
        element.set_open(false);
        element.set_read_only(true);
        element.set_kind(ElementKind::Check(true));
        element.set_children_format(ChildrenFormat::Numbered);
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["open"], false);
        assert_eq!(json["readOnly"], true);
        assert_eq!(json["kind"], serde_json::json!({"type": "check", "value": true}));
        assert_eq!(json["childrenFormat"], "numbered");
        let decoded: Element = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, element);
    }

    #[test]
    fn test_decode_plain_string_text() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"id":"{id}","text":"plain"}}"#);
        let element: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(element.text().text(), "plain");
        assert!(element.is_open());
    }

    #[test]
    fn test_unknown_kind_round_trips() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"id":"{id}","kind":{{"type":"hologram","depth":3,"tint":{{"r":1}}}}}}"#
        );
        let element: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(element.kind().name(), "hologram");
        let encoded = serde_json::to_value(&element).unwrap();
        assert_eq!(
            encoded["kind"],
            serde_json::json!({"type": "hologram", "depth": 3, "tint": {"r": 1}})
        );
    }

    #[test]
    fn test_media_and_reference_kinds_decode() {
        let image = Uuid::new_v4();
        let kind: ElementKind = serde_json::from_value(serde_json::json!({
            "type": "image",
            "source": image.to_string(),
            "displayInfos": {"height": 300, "width": 400, "displayRatio": 0.75}
        }))
        .unwrap();
        assert_eq!(
            kind,
            ElementKind::Image {
                id: image,
                display: MediaDisplay {
                    height: Some(300),
                    width: Some(400),
                    display_ratio: Some(0.75),
                },
            }
        );
        assert!(kind.is_media());

        let embed: ElementKind = serde_json::from_value(serde_json::json!({
            "type": "embed",
            "source": "https://video.example/watch",
            "sizeRatio": 0.5
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&embed).unwrap(),
            serde_json::json!({
                "type": "embed",
                "source": "https://video.example/watch",
                "displayInfos": {"displayRatio": 0.5}
            })
        );

        let (note_id, element_id) = (Uuid::new_v4(), Uuid::new_v4());
        let reference: ElementKind = serde_json::from_value(serde_json::json!({
            "type": "blockReference",
            "title": note_id.to_string(),
            "source": element_id.to_string()
        }))
        .unwrap();
        assert_eq!(
            reference,
            ElementKind::BlockReference {
                note_id,
                element_id
            }
        );

        let summary: ElementKind =
            serde_json::from_value(serde_json::json!({"type": "dailySummary"})).unwrap();
        assert_eq!(summary, ElementKind::DailySummary);
    }

    #[test]
    fn test_image_without_id_is_rejected() {
        let result: Result<ElementKind, _> =
            serde_json::from_value(serde_json::json!({"type": "image", "source": "cat.png"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_heading_level_is_clamped() {
        let kind: ElementKind =
            serde_json::from_value(serde_json::json!({"type": "heading", "level": 42})).unwrap();
        assert_eq!(kind, ElementKind::Heading(defaults::MAX_HEADING_LEVEL));
        assert_eq!(ElementKind::heading(0), ElementKind::Heading(1));
    }

    #[test]
    fn test_links_and_unlinked_references() {
        let mut child = Element::with_text("Rust and rust again");
        child.edit_text(|t| t.add_attributes(&[Attribute::InternalLink("Rust".into())], 0..4));
        let cid = child.id;
        let mut link = Element::with_text("site");
        link.edit_text(|t| t.add_attributes(&[Attribute::Link("https://x.example".into())], 0..4));
        let lid = link.id;
        let root = Element::with_text("about Rust").child(child).child(link);

        assert_eq!(root.out_links(), vec!["https://x.example".to_string()]);
        assert_eq!(root.internal_links(), vec!["Rust".to_string()]);
        assert_eq!(root.element_containing_link("https://x.example").unwrap().id(), lid);
        assert_eq!(root.element_containing_text("site").unwrap().id(), lid);

        let refs = root.deep_unlinked_references(&["Rust"]);
        let mentions = &refs["Rust"];
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0].element_id, root.id());
        assert_eq!(mentions[1].element_id, cid);
        assert_eq!(mentions[1].spans, vec![9..13]);
    }

    #[test]
    fn test_unlink_and_rename_count_elements() {
        let mut a = Element::with_text("Old");
        a.edit_text(|t| t.add_attributes(&[Attribute::InternalLink("Old".into())], 0..3));
        let mut b = Element::with_text("see Old");
        b.edit_text(|t| t.add_attributes(&[Attribute::InternalLink("Old".into())], 4..7));
        let mut root = Element::new().child(a).child(b);

        assert_eq!(root.rename_internal_links("Old", "New"), 2);
        assert_eq!(root.internal_links(), vec!["New".to_string(), "New".to_string()]);
        assert_eq!(root.unlink_note("new"), 2);
        assert!(root.internal_links().is_empty());
        assert_eq!(root.children()[1].text().text(), "see New");
    }

    #[test]
    fn test_word_count_and_empty() {
        let (root, _, _, _) = tree();
        assert_eq!(root.word_count(), 3);
        assert!(!root.is_empty_subtree());
        assert!(Element::new().is_empty_subtree());
    }
}
