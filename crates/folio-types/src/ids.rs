//! Typed identifiers for documents, groups, blocks, reference targets, and principals.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique). They persist as
//! 32-character simple hex and display as standard UUID text for logging. The
//! `short()` form (first 8 hex chars) is for human-facing output; lookups by
//! prefix go through [`resolve_prefix`].
//!
//! `PrincipalId` also has a deterministic sentinel via `PrincipalId::system()`,
//! derived from UUIDv5, used by local tooling that acts without a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A document identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A group identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(uuid::Uuid);

/// A block identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(uuid::Uuid);

/// A URL record identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlId(uuid::Uuid);

/// The untyped target of a block reference; its meaning depends on the `RefType`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(uuid::Uuid);

/// A principal identifier (UUIDv7, or UUIDv5 for sentinels).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters — for human display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens). This is the stored form.
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// Check if a query string matches this ID by hex prefix.
            pub fn matches_hex_prefix(&self, prefix: &str) -> bool {
                self.to_hex().starts_with(&prefix.to_ascii_lowercase())
            }

            /// A nil / zero ID — for sentinel values only.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            /// Check if this is the nil ID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(DocumentId, "DocumentId");
impl_typed_id!(GroupId, "GroupId");
impl_typed_id!(BlockId, "BlockId");
impl_typed_id!(UrlId, "UrlId");
impl_typed_id!(RefId, "RefId");
impl_typed_id!(PrincipalId, "PrincipalId");

impl From<GroupId> for RefId {
    fn from(id: GroupId) -> Self {
        Self(id.0)
    }
}

impl From<UrlId> for RefId {
    fn from(id: UrlId) -> Self {
        Self(id.0)
    }
}

impl From<RefId> for GroupId {
    fn from(id: RefId) -> Self {
        Self(id.0)
    }
}

impl From<RefId> for UrlId {
    fn from(id: RefId) -> Self {
        Self(id.0)
    }
}

// ── PrincipalId sentinels ───────────────────────────────────────────────────

/// Fixed namespace for deriving deterministic PrincipalIds via UUIDv5.
const FOLIO_PRINCIPAL_NS: uuid::Uuid = uuid::uuid!("3f0d9a52-6c1e-4b7a-9e24-8d5b17c0a3e9");

impl PrincipalId {
    /// The well-known "system" principal.
    ///
    /// Used by the command-line tool, which acts on a local database without
    /// a session. Deterministic: same value every time.
    pub fn system() -> Self {
        Self(uuid::Uuid::new_v5(&FOLIO_PRINCIPAL_NS, b"system"))
    }
}

// ── Prefix resolution ───────────────────────────────────────────────────────

/// Error from ambiguous prefix resolution.
#[derive(Debug, thiserror::Error)]
pub enum PrefixError {
    #[error("no match for prefix '{0}'")]
    NoMatch(String),
    #[error("ambiguous prefix '{prefix}': matches {candidates:?}")]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },
}

/// Types that can take part in hex prefix resolution.
pub trait PrefixResolvable: Copy {
    fn matches_prefix(&self, prefix: &str) -> bool;
    fn short_form(&self) -> String;
}

macro_rules! impl_prefix_resolvable {
    ($($T:ident),*) => {
        $(impl PrefixResolvable for $T {
            fn matches_prefix(&self, prefix: &str) -> bool {
                self.matches_hex_prefix(prefix)
            }

            fn short_form(&self) -> String {
                self.short()
            }
        })*
    };
}

impl_prefix_resolvable!(DocumentId, GroupId, BlockId);

/// Resolve a query string against a set of IDs with optional labels.
///
/// Resolution order:
/// 1. Full ID parse
/// 2. Exact label match
/// 3. Unique hex prefix match
/// 4. Error (no match or ambiguous)
pub fn resolve_prefix<'a, T>(
    candidates: impl Iterator<Item = (T, Option<&'a str>)>,
    query: &str,
) -> Result<T, PrefixError>
where
    T: PrefixResolvable + FromStr + PartialEq,
{
    let entries: Vec<(T, Option<&str>)> = candidates.collect();

    if let Ok(full) = query.parse::<T>()
        && entries.iter().any(|(id, _)| *id == full)
    {
        return Ok(full);
    }

    for &(id, label) in &entries {
        if label == Some(query) {
            return Ok(id);
        }
    }

    let hex_matches: Vec<T> = entries
        .iter()
        .filter(|(id, _)| id.matches_prefix(query))
        .map(|(id, _)| *id)
        .collect();

    match hex_matches.len() {
        0 => Err(PrefixError::NoMatch(query.to_string())),
        1 => Ok(hex_matches[0]),
        _ => Err(PrefixError::Ambiguous {
            prefix: query.to_string(),
            candidates: hex_matches.iter().map(|id| id.short_form()).collect(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
