//! Block references: a block may point at one external item (a URL record or
//! a group) through a `(ref_type, ref_id)` pair.
//!
//! `RefType` is the key into the kernel's resolver registry; `RefItem` is the
//! tagged union a resolver hydrates the pair into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::group::{Group, UrlRecord};
use crate::ids::{GroupId, RefId, UrlId};

/// Kind of item a block reference points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum RefType {
    /// A URL record owned by the same document.
    Url,
    /// A group of the same document.
    Group,
}

impl RefType {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::Url => "url",
            RefType::Group => "group",
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored `(ref_type, ref_id)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub ref_type: RefType,
    pub ref_id: RefId,
}

impl Reference {
    pub fn new(ref_type: RefType, ref_id: impl Into<RefId>) -> Self {
        Self {
            ref_type,
            ref_id: ref_id.into(),
        }
    }

    pub fn url(id: UrlId) -> Self {
        Self::new(RefType::Url, id)
    }

    pub fn group(id: GroupId) -> Self {
        Self::new(RefType::Group, id)
    }
}

/// Fields for a reference target created alongside the block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "refType", rename_all = "lowercase")]
pub enum NewReference {
    /// A URL; metadata is supplied by the caller (fetching happens elsewhere).
    Url {
        url: String,
        title: Option<String>,
        description: Option<String>,
    },
    /// A new group in the block's document.
    Group {
        name: String,
        description: Option<String>,
    },
}

impl NewReference {
    pub fn ref_type(&self) -> RefType {
        match self {
            NewReference::Url { .. } => RefType::Url,
            NewReference::Group { .. } => RefType::Group,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        NewReference::Url {
            url: url.into(),
            title: None,
            description: None,
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        NewReference::Group {
            name: name.into(),
            description: None,
        }
    }
}

/// Reference part of a create/update request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceInput {
    /// Point at an item that already exists.
    Existing(Reference),
    /// Create the item in the same transaction, then point at it.
    Create(NewReference),
}

impl ReferenceInput {
    pub fn ref_type(&self) -> RefType {
        match self {
            ReferenceInput::Existing(r) => r.ref_type,
            ReferenceInput::Create(n) => n.ref_type(),
        }
    }
}

impl From<Reference> for ReferenceInput {
    fn from(r: Reference) -> Self {
        ReferenceInput::Existing(r)
    }
}

impl From<NewReference> for ReferenceInput {
    fn from(n: NewReference) -> Self {
        ReferenceInput::Create(n)
    }
}

/// A hydrated reference target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RefItem {
    Url(UrlRecord),
    Group(Group),
}

impl RefItem {
    pub fn ref_type(&self) -> RefType {
        match self {
            RefItem::Url(_) => RefType::Url,
            RefItem::Group(_) => RefType::Group,
        }
    }

    /// Short human-facing label.
    pub fn label(&self) -> String {
        match self {
            RefItem::Url(u) => u.title.clone().unwrap_or_else(|| u.url.clone()),
            RefItem::Group(g) => g.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_type_parsing() {
        assert_eq!(RefType::from_str("url"), Some(RefType::Url));
        assert_eq!(RefType::from_str("Group"), Some(RefType::Group));
        assert_eq!(RefType::from_str("video"), None);
    }

    #[test]
    fn test_reference_constructors_set_type() {
        let g = GroupId::new();
        let r = Reference::group(g);
        assert_eq!(r.ref_type, RefType::Group);
        assert_eq!(GroupId::from(r.ref_id), g);

        let u = UrlId::new();
        assert_eq!(Reference::url(u).ref_type, RefType::Url);
    }

    #[test]
    fn test_input_ref_type() {
        let create: ReferenceInput = NewReference::group("Appendix").into();
        assert_eq!(create.ref_type(), RefType::Group);

        let existing: ReferenceInput = Reference::url(UrlId::new()).into();
        assert_eq!(existing.ref_type(), RefType::Url);
    }
}
