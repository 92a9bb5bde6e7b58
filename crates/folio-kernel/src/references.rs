//! Reference resolution: turning a stored `(ref_type, ref_id)` pair into a
//! [`RefItem`], and creating reference targets inline.
//!
//! One resolver per [`RefType`], held in a [`ResolverRegistry`]. Resolvers
//! only see items of the block's own document; anything else reads as absent.

use std::collections::HashMap;
use std::sync::Arc;

use folio_types::{DocumentId, NewReference, RefId, RefItem, RefType, Reference, ReferenceInput};
use rusqlite::Connection;

use crate::error::{FolioError, FolioResult};
use crate::store;

// ============================================================================
// Resolver trait
// ============================================================================

/// Resolves and creates reference targets of one kind.
pub trait ReferenceResolver: Send + Sync {
    /// The kind this resolver handles.
    fn ref_type(&self) -> RefType;

    /// Look up `ref_id` within `document`. `None` if absent or owned elsewhere.
    fn resolve(
        &self,
        conn: &Connection,
        document: DocumentId,
        ref_id: RefId,
    ) -> FolioResult<Option<RefItem>>;

    /// Create a new target in `document` and return its id.
    fn create(
        &self,
        conn: &Connection,
        document: DocumentId,
        new: &NewReference,
    ) -> FolioResult<RefId>;
}

// ============================================================================
// Built-in resolvers
// ============================================================================

/// URL records. Metadata comes from the caller.
pub struct UrlResolver;

impl ReferenceResolver for UrlResolver {
    fn ref_type(&self) -> RefType {
        RefType::Url
    }

    fn resolve(
        &self,
        conn: &Connection,
        document: DocumentId,
        ref_id: RefId,
    ) -> FolioResult<Option<RefItem>> {
        Ok(store::get_url(conn, ref_id.into())?
            .filter(|u| u.document_id == document)
            .map(RefItem::Url))
    }

    fn create(
        &self,
        conn: &Connection,
        document: DocumentId,
        new: &NewReference,
    ) -> FolioResult<RefId> {
        let NewReference::Url {
            url,
            title,
            description,
        } = new
        else {
            return Err(FolioError::invalid("reference", "expected a url reference"));
        };
        if url.trim().is_empty() {
            return Err(FolioError::invalid("url", "must not be empty"));
        }
        let record = store::insert_url(
            conn,
            document,
            url,
            title.as_deref(),
            description.as_deref(),
        )?;
        Ok(record.id.into())
    }
}

/// Groups of the same document.
pub struct GroupResolver;

impl ReferenceResolver for GroupResolver {
    fn ref_type(&self) -> RefType {
        RefType::Group
    }

    fn resolve(
        &self,
        conn: &Connection,
        document: DocumentId,
        ref_id: RefId,
    ) -> FolioResult<Option<RefItem>> {
        Ok(store::get_group(conn, ref_id.into())?
            .filter(|g| g.document_id == document)
            .map(RefItem::Group))
    }

    fn create(
        &self,
        conn: &Connection,
        document: DocumentId,
        new: &NewReference,
    ) -> FolioResult<RefId> {
        let NewReference::Group { name, description } = new else {
            return Err(FolioError::invalid("reference", "expected a group reference"));
        };
        if name.trim().is_empty() {
            return Err(FolioError::invalid("group name", "must not be empty"));
        }
        let group = store::insert_group(conn, document, name, description.as_deref())?;
        Ok(group.id.into())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Resolvers keyed by the kind they handle.
#[derive(Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<RefType, Arc<dyn ReferenceResolver>>,
}

impl ResolverRegistry {
    /// An empty registry. Every reference fails to resolve.
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    /// Register a resolver, replacing any previous one for its kind.
    pub fn register(&mut self, resolver: Arc<dyn ReferenceResolver>) {
        self.resolvers.insert(resolver.ref_type(), resolver);
    }

    pub fn get(&self, ref_type: RefType) -> Option<&Arc<dyn ReferenceResolver>> {
        self.resolvers.get(&ref_type)
    }

    fn require(&self, ref_type: RefType) -> FolioResult<&Arc<dyn ReferenceResolver>> {
        self.get(ref_type).ok_or_else(|| {
            FolioError::invalid("ref_type", format!("no resolver registered for '{ref_type}'"))
        })
    }

    /// Hydrate a stored reference. `Ok(None)` marks it unavailable.
    pub fn hydrate(
        &self,
        conn: &Connection,
        document: DocumentId,
        reference: &Reference,
    ) -> FolioResult<Option<RefItem>> {
        match self.get(reference.ref_type) {
            Some(resolver) => resolver.resolve(conn, document, reference.ref_id),
            None => Ok(None),
        }
    }

    /// Validate or create the reference in a write request.
    ///
    /// Existing references must resolve within `document`; new ones are
    /// created in the caller's transaction.
    pub fn prepare(
        &self,
        conn: &Connection,
        document: DocumentId,
        input: &ReferenceInput,
    ) -> FolioResult<(Reference, RefItem)> {
        let resolver = self.require(input.ref_type())?;
        let ref_id = match input {
            ReferenceInput::Existing(r) => r.ref_id,
            ReferenceInput::Create(new) => resolver.create(conn, document, new)?,
        };
        let item = resolver
            .resolve(conn, document, ref_id)?
            .ok_or_else(|| FolioError::not_found(input.ref_type().as_str(), ref_id))?;
        Ok((Reference::new(resolver.ref_type(), ref_id), item))
    }
}

impl Default for ResolverRegistry {
    /// Registry with the built-in URL and group resolvers.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(UrlResolver));
        registry.register(Arc::new(GroupResolver));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::Store;
    use folio_types::{GroupId, UrlId};

    #[test]
    fn test_existing_reference_must_share_document() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let other = store.create_document("Other", None).unwrap();
        let foreign = store.create_group(other.id, "Elsewhere", None).unwrap();
        let local = store.create_group(doc.id, "Here", None).unwrap();
        let registry = ResolverRegistry::default();

        let (reference, item) = store
            .read(|conn| {
                registry.prepare(conn, doc.id, &Reference::group(local.id).into())
            })
            .unwrap();
        assert_eq!(reference, Reference::group(local.id));
        assert_eq!(item.label(), "Here");

        let err = store
            .read(|conn| registry.prepare(conn, doc.id, &Reference::group(foreign.id).into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store
            .read(|conn| registry.prepare(conn, doc.id, &Reference::url(UrlId::new()).into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_inline_creation() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let registry = ResolverRegistry::default();

        let input: ReferenceInput = NewReference::Url {
            url: "https://example.org/paper".into(),
            title: Some("Paper".into()),
            description: None,
        }
        .into();
        let (reference, item) = store.write(|tx| registry.prepare(tx, doc.id, &input)).unwrap();
        assert_eq!(reference.ref_type, RefType::Url);
        assert!(matches!(&item, RefItem::Url(u) if u.url == "https://example.org/paper"));

        let (reference, _) = store
            .write(|tx| registry.prepare(tx, doc.id, &NewReference::group("Appendix").into()))
            .unwrap();
        let group = store.get_group(GroupId::from(reference.ref_id)).unwrap().unwrap();
        assert_eq!(group.document_id, doc.id);
    }

    #[test]
    fn test_blank_inline_target_rejected() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let registry = ResolverRegistry::default();
        let err = store
            .write(|tx| registry.prepare(tx, doc.id, &NewReference::group("   ").into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_unregistered_kind() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let registry = ResolverRegistry::empty();
        let reference = Reference::group(GroupId::new());

        let err = store
            .read(|conn| registry.prepare(conn, doc.id, &reference.into()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(store.read(|conn| registry.hydrate(conn, doc.id, &reference)).unwrap().is_none());
    }
}
