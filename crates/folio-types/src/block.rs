//! Block types: the ordered outline node, its scope, and mutation requests.
//!
//! A block lives in exactly one sibling set, identified by its [`Scope`]
//! (document + optional group + optional parent). Position within the set is
//! the dense `order_number`. Structural fields (`group_id`, `parent_id`,
//! `order_number`) change only through a move; content fields change only
//! through an update.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{BlockId, DocumentId, GroupId};
use crate::reference::{RefItem, Reference, ReferenceInput};

/// Maximum block title length, in characters.
pub const MAX_TITLE_LEN: usize = 255;

/// Presentation style of a block within its list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum StyleType {
    /// Bullet point list item.
    #[default]
    Bullet,
    /// Numbered relative to the other numbered items in the same list.
    Numbered,
    /// No marker.
    #[strum(serialize = "none", serialize = "plain")]
    None,
}

impl StyleType {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleType::Bullet => "bullet",
            StyleType::Numbered => "numbered",
            StyleType::None => "none",
        }
    }
}

impl fmt::Display for StyleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format of the title/body text. Rendering happens outside the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ContentType {
    /// Plain text with potential newlines.
    #[strum(serialize = "plaintext", serialize = "text")]
    Plaintext,
    /// Markdown source.
    #[strum(serialize = "markdown", serialize = "md")]
    Markdown,
    /// HTML to be sanitized before display.
    Html,
}

impl ContentType {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Plaintext => "plaintext",
            ContentType::Markdown => "markdown",
            ContentType::Html => "html",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies a sibling set: all blocks sharing document, group and parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub document_id: DocumentId,
    pub group_id: Option<GroupId>,
    pub parent_id: Option<BlockId>,
}

impl Scope {
    /// Root level of a document, outside any group.
    pub fn root(document_id: DocumentId) -> Self {
        Self {
            document_id,
            group_id: None,
            parent_id: None,
        }
    }

    /// Same document and parent, scoped into `group`.
    pub fn in_group(mut self, group: impl Into<Option<GroupId>>) -> Self {
        self.group_id = group.into();
        self
    }

    /// Same document and group, children of `parent`.
    pub fn under(mut self, parent: impl Into<Option<BlockId>>) -> Self {
        self.parent_id = parent.into();
        self
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document_id.short())?;
        match self.group_id {
            Some(g) => write!(f, "/{}", g.short())?,
            None => write!(f, "/-")?,
        }
        match self.parent_id {
            Some(p) => write!(f, "/{}", p.short()),
            None => write!(f, "/-"),
        }
    }
}

/// A persisted block, optionally hydrated with its reference item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub document_id: DocumentId,
    pub group_id: Option<GroupId>,
    pub parent_id: Option<BlockId>,
    pub order_number: u32,
    pub style_type: StyleType,
    pub content_type: Option<ContentType>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub reference: Option<Reference>,
    /// Resolved reference target. `None` while `reference` is set means the
    /// target has been removed and should display as unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_item: Option<RefItem>,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub updated_at: u64,
}

impl Block {
    /// The sibling set this block belongs to.
    pub fn scope(&self) -> Scope {
        Scope {
            document_id: self.document_id,
            group_id: self.group_id,
            parent_id: self.parent_id,
        }
    }

    /// Check if this is a root block within its scope.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// A reference is set but its target no longer resolves.
    pub fn ref_unavailable(&self) -> bool {
        self.reference.is_some() && self.ref_item.is_none()
    }

    /// Single-line label for listings: title, else body, else the reference.
    pub fn label(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        if let Some(body) = &self.body {
            return body.lines().next().unwrap_or_default().to_string();
        }
        match (&self.reference, &self.ref_item) {
            (_, Some(item)) => item.label(),
            (Some(r), None) => format!("<{} unavailable>", r.ref_type),
            (None, None) => String::new(),
        }
    }
}

/// A block with its ordered children, for nested presentation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    #[serde(flatten)]
    pub block: Block,
    #[serde(default, rename = "subblocks", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BlockNode>,
}

impl BlockNode {
    /// Number of blocks in this subtree, including the root.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// A node always contains at least its own block.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Visit every block in this subtree, parents before children.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a Block)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            f(&node.block);
            stack.extend(node.children.iter().rev());
        }
    }
}

// Outlines can nest thousands of levels; unlink children one level at a time
// instead of letting the default drop recurse.
impl Drop for BlockNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

/// Content fields of a block, used for create and update.
///
/// Text is normalized by the engine: surrounding whitespace is trimmed and
/// empty strings become absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockContent {
    pub style_type: StyleType,
    pub content_type: Option<ContentType>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub reference: Option<ReferenceInput>,
}

impl BlockContent {
    /// Content with a title and default style.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: StyleType) -> Self {
        self.style_type = style;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<ReferenceInput>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Request to create a block in `scope`, optionally before an existing sibling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewBlock {
    pub scope: Scope,
    pub insert_before: Option<BlockId>,
    pub content: BlockContent,
}

impl NewBlock {
    /// Append at the end of `scope`.
    pub fn append(scope: Scope, content: BlockContent) -> Self {
        Self {
            scope,
            insert_before: None,
            content,
        }
    }

    /// Insert before an existing sibling in `scope`.
    pub fn before(scope: Scope, sibling: BlockId, content: BlockContent) -> Self {
        Self {
            scope,
            insert_before: Some(sibling),
            content,
        }
    }
}

/// Request to relocate an ordered selection of blocks sharing one scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub block_ids: Vec<BlockId>,
    pub target_group: Option<GroupId>,
    pub target_parent: Option<BlockId>,
    pub insert_before: Option<BlockId>,
}

impl MoveRequest {
    /// Move `block_ids` to the end of the root level of `target_group`.
    pub fn new(block_ids: impl IntoIterator<Item = BlockId>, target_group: Option<GroupId>) -> Self {
        Self {
            block_ids: block_ids.into_iter().collect(),
            target_group,
            target_parent: None,
            insert_before: None,
        }
    }

    pub fn under(mut self, parent: BlockId) -> Self {
        self.target_parent = Some(parent);
        self
    }

    pub fn before(mut self, sibling: BlockId) -> Self {
        self.insert_before = Some(sibling);
        self
    }
}

/// Result of a move.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "blocks", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Blocks changed position or parent within the same group.
    Reordered,
    /// Blocks changed group. Carries every moved block followed by its
    /// re-scoped descendants, parents before children.
    Rescoped(Vec<Block>),
}

impl MoveOutcome {
    pub fn is_rescoped(&self) -> bool {
        matches!(self, MoveOutcome::Rescoped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(title: Option<&str>, body: Option<&str>) -> Block {
        Block {
            id: BlockId::new(),
            document_id: DocumentId::new(),
            group_id: None,
            parent_id: None,
            order_number: 0,
            style_type: StyleType::Bullet,
            content_type: None,
            title: title.map(String::from),
            body: body.map(String::from),
            reference: None,
            ref_item: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_style_type_parsing() {
        assert_eq!(StyleType::from_str("bullet"), Some(StyleType::Bullet));
        assert_eq!(StyleType::from_str("NUMBERED"), Some(StyleType::Numbered));
        assert_eq!(StyleType::from_str("plain"), Some(StyleType::None));
        assert_eq!(StyleType::from_str("checkbox"), None);
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!(ContentType::from_str("plaintext"), Some(ContentType::Plaintext));
        assert_eq!(ContentType::from_str("md"), Some(ContentType::Markdown));
        assert_eq!(ContentType::from_str("rtf"), None);
    }

    #[test]
    fn test_as_str_roundtrips_through_parse() {
        for style in [StyleType::Bullet, StyleType::Numbered, StyleType::None] {
            assert_eq!(StyleType::from_str(style.as_str()), Some(style));
        }
        for ct in [ContentType::Plaintext, ContentType::Markdown, ContentType::Html] {
            assert_eq!(ContentType::from_str(ct.as_str()), Some(ct));
        }
    }

    #[test]
    fn test_scope_builders() {
        let doc = DocumentId::new();
        let group = GroupId::new();
        let parent = BlockId::new();
        let scope = Scope::root(doc).in_group(group).under(parent);
        assert_eq!(scope.document_id, doc);
        assert_eq!(scope.group_id, Some(group));
        assert_eq!(scope.parent_id, Some(parent));
        assert_eq!(Scope::root(doc).in_group(None).group_id, None);
    }

    #[test]
    fn test_label_prefers_title_then_body() {
        assert_eq!(sample(Some("Title"), Some("Body")).label(), "Title");
        assert_eq!(sample(None, Some("first\nsecond")).label(), "first");
        assert_eq!(sample(None, None).label(), "");
    }

    #[test]
    fn test_node_len_counts_subtree() {
        let leaf = BlockNode {
            block: sample(Some("leaf"), None),
            children: vec![],
        };
        let mid = BlockNode {
            block: sample(Some("mid"), None),
            children: vec![leaf.clone(), leaf],
        };
        let root = BlockNode {
            block: sample(Some("root"), None),
            children: vec![mid],
        };
        assert_eq!(root.len(), 4);

        let mut titles = Vec::new();
        root.for_each(&mut |b| titles.push(b.label()));
        assert_eq!(titles, vec!["root", "mid", "leaf", "leaf"]);
    }

    #[test]
    fn test_deep_node_chain_counts_and_drops() {
        let mut node = BlockNode {
            block: sample(Some("leaf"), None),
            children: vec![],
        };
        for _ in 0..100_000 {
            node = BlockNode {
                block: sample(Some("link"), None),
                children: vec![node],
            };
        }
        assert_eq!(node.len(), 100_001);

        let mut visited = 0;
        node.for_each(&mut |_| visited += 1);
        assert_eq!(visited, 100_001);
        drop(node);
    }

    #[test]
    fn test_block_serializes_camel_case() {
        let block = sample(Some("x"), None);
        let json = serde_json::to_value(&block).unwrap();
        assert!(json.get("orderNumber").is_some());
        assert!(json.get("styleType").is_some());
        assert!(json.get("refItem").is_none());
    }
}
