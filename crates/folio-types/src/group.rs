//! Containers around blocks: documents, groups, and URL records.
//!
//! These are owned by the document management surface. The engine reads them
//! to validate scopes and references, and touches `blocks_updated_at` after
//! structural mutations.

use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, GroupId, UrlId};

/// Maximum group name length, in characters. Longer names are truncated.
pub const MAX_GROUP_NAME_LEN: usize = 255;

/// Top-level owner of a block tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: u64,
    /// Last structural or content change to any block, if any.
    pub blocks_updated_at: Option<u64>,
}

/// Optional named partition of a document's blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub document_id: DocumentId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: u64,
    pub blocks_updated_at: Option<u64>,
}

/// A URL a block can reference. Title and description come from the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    pub id: UrlId,
    pub document_id: DocumentId,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: u64,
}

/// Truncate a group name to [`MAX_GROUP_NAME_LEN`] characters.
pub fn truncate_group_name(name: &str) -> String {
    name.trim().chars().take(MAX_GROUP_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_group_name() {
        assert_eq!(truncate_group_name("  Chapter 1 "), "Chapter 1");
        let long = "é".repeat(300);
        assert_eq!(truncate_group_name(&long).chars().count(), MAX_GROUP_NAME_LEN);
    }
}
