//! Shared identity, block, and reference types for Folio.
//!
//! This crate is the leaf of the workspace: typed IDs, blocks and their
//! scopes, references, and the request/outcome types the kernel accepts. It
//! has **no internal folio dependencies** and no storage code.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── contains Group (GroupId), an optional partition
//!     └── contains UrlRecord (UrlId), a reference target
//!     └── owns Block (BlockId)
//!
//! Block
//!     └── scope = (document, group?, parent?) → one sibling set
//!     └── order_number = dense position in that set
//!     └── reference? → RefType + RefId → RefItem (Url | Group)
//! ```
//!
//! # Key Types
//!
//! |------------------|------------------------------------------------|
//! | Type             | Purpose                                        |
//! |------------------|------------------------------------------------|
//! | [`Block`]        | Persisted block, optionally hydrated           |
//! | [`Scope`]        | Sibling set identity                           |
//! | [`BlockNode`]    | Block with ordered children                    |
//! | [`NewBlock`]     | Create request                                 |
//! | [`MoveRequest`]  | Multi-block move request                       |
//! | [`Reference`]    | Stored `(ref_type, ref_id)` pair               |
//! | [`RefItem`]      | Hydrated reference target                      |
//! |------------------|------------------------------------------------|

pub mod block;
pub mod group;
pub mod ids;
pub mod reference;

// Re-export primary types at crate root for convenience.
pub use block::{
    Block, BlockContent, BlockNode, ContentType, MAX_TITLE_LEN, MoveOutcome, MoveRequest,
    NewBlock, Scope, StyleType,
};
pub use group::{Document, Group, MAX_GROUP_NAME_LEN, UrlRecord, truncate_group_name};
pub use ids::{
    BlockId, DocumentId, GroupId, PrefixError, PrefixResolvable, PrincipalId, RefId, UrlId,
    resolve_prefix,
};
pub use reference::{NewReference, RefItem, RefType, Reference, ReferenceInput};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
