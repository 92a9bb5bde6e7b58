//! Write authorization seam.
//!
//! Policy lives outside the engine. Callers check [`ensure_write`] before
//! invoking a mutation; the engine itself never asks.

use folio_types::{DocumentId, GroupId, PrincipalId};

use crate::error::{FolioError, FolioResult};

/// What a write is about to touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteScope {
    /// Blocks scoped directly to the document.
    Document(DocumentId),
    /// Blocks inside one group of the document.
    Group(DocumentId, GroupId),
}

impl WriteScope {
    pub fn new(document: DocumentId, group: Option<GroupId>) -> Self {
        match group {
            Some(g) => WriteScope::Group(document, g),
            None => WriteScope::Document(document),
        }
    }

    pub fn document(&self) -> DocumentId {
        match *self {
            WriteScope::Document(d) | WriteScope::Group(d, _) => d,
        }
    }
}

/// Decides whether a principal may write to a scope.
pub trait AccessControl: Send + Sync {
    fn can_write(&self, principal: PrincipalId, scope: WriteScope) -> bool;
}

/// Grants every write. Used by the local command-line tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn can_write(&self, _: PrincipalId, _: WriteScope) -> bool {
        true
    }
}

/// Turn a refusal into [`FolioError::PermissionDenied`].
pub fn ensure_write(
    access: &dyn AccessControl,
    principal: PrincipalId,
    scope: WriteScope,
) -> FolioResult<()> {
    if access.can_write(principal, scope) {
        Ok(())
    } else {
        tracing::warn!(principal = %principal, document = %scope.document(), "write refused");
        Err(FolioError::PermissionDenied)
    }
}
