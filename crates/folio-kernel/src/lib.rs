//! # folio-kernel
//!
//! Transactional outline engine. Blocks live in sibling sets keyed by
//! `(document, group, parent)`; the kernel keeps their order dense, moves
//! selections between sets, and carries whole subtrees along when a move
//! changes group.
//!
//! Layering, leaves first:
//! - [`store`]: SQLite rows and the IMMEDIATE write transaction
//! - [`allocator`]: slot allocation and compaction within a sibling set
//! - [`mutator`]: create / update / move / delete
//! - [`assembler`]: rows back into an ordered tree
//! - [`touch`]: freshness timestamps after mutations
//!
//! [`Folio`] ties them together: every mutation is one transaction.

pub mod access;
pub mod allocator;
pub mod assembler;
pub mod config;
pub mod error;
pub mod integrity;
pub mod mutator;
pub mod references;
pub mod store;
pub mod touch;

use std::sync::Arc;

use folio_types::{Block, BlockContent, BlockId, DocumentId, MoveOutcome, MoveRequest, NewBlock};

pub use access::{AccessControl, AllowAll, WriteScope, ensure_write};
pub use assembler::{BlockTree, GroupFilter, Walk};
pub use config::{ConfigError, DatabaseConfig, FolioConfig, GapPolicy, OrderingConfig};
pub use error::{ErrorKind, FolioError, FolioResult};
pub use integrity::Violation;
pub use mutator::{Mutator, parse_content_type, parse_style_type};
pub use references::{GroupResolver, ReferenceResolver, ResolverRegistry, UrlResolver};
pub use store::Store;
pub use touch::{NoTouch, TimestampTouch, TouchHook};

/// The outline engine: a store plus the collaborators mutations consult.
pub struct Folio {
    store: Store,
    registry: ResolverRegistry,
    touch: Arc<dyn TouchHook>,
    gap_policy: GapPolicy,
}

impl Folio {
    /// Open the database named in `config`.
    pub fn open(config: &FolioConfig) -> FolioResult<Self> {
        let store = Store::open(&config.database)?;
        tracing::debug!(path = %config.database.path.display(), "opened outline store");
        Ok(Self::with_store(store).with_gap_policy(config.ordering.gap_policy))
    }

    /// Engine over a fresh in-memory database (for testing).
    pub fn in_memory() -> FolioResult<Self> {
        Ok(Self::with_store(Store::in_memory()?))
    }

    /// Engine with default collaborators over an existing store.
    pub fn with_store(store: Store) -> Self {
        Self {
            store,
            registry: ResolverRegistry::default(),
            touch: Arc::new(TimestampTouch),
            gap_policy: GapPolicy::default(),
        }
    }

    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    pub fn with_touch(mut self, touch: Arc<dyn TouchHook>) -> Self {
        self.touch = touch;
        self
    }

    pub fn with_registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    fn mutator(&self) -> Mutator<'_> {
        Mutator {
            registry: &self.registry,
            touch: self.touch.as_ref(),
            gap_policy: self.gap_policy,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    #[tracing::instrument(skip_all, name = "folio.create_block", fields(document = %request.scope.document_id))]
    pub fn create_block(&self, request: NewBlock) -> FolioResult<Block> {
        let block = self
            .store
            .write(|tx| self.mutator().create_block(tx, request))?;
        tracing::info!(block = %block.id, order = block.order_number, "block created");
        Ok(block)
    }

    #[tracing::instrument(skip_all, name = "folio.update_block", fields(block = %id))]
    pub fn update_block(&self, id: BlockId, content: BlockContent) -> FolioResult<Block> {
        let block = self
            .store
            .write(|tx| self.mutator().update_block(tx, id, content))?;
        tracing::info!(document = %block.document_id, "block updated");
        Ok(block)
    }

    #[tracing::instrument(skip_all, name = "folio.move_blocks", fields(count = request.block_ids.len()))]
    pub fn move_blocks(&self, request: MoveRequest) -> FolioResult<MoveOutcome> {
        let outcome = self
            .store
            .write(|tx| self.mutator().move_blocks(tx, request))?;
        tracing::info!(rescoped = outcome.is_rescoped(), "blocks moved");
        Ok(outcome)
    }

    #[tracing::instrument(skip_all, name = "folio.delete_block", fields(block = %id))]
    pub fn delete_block(&self, id: BlockId) -> FolioResult<usize> {
        let removed = self
            .store
            .write(|tx| self.mutator().delete_block(tx, id))?;
        tracing::info!(removed, "block deleted");
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn load_tree(&self, document: DocumentId, filter: GroupFilter) -> FolioResult<BlockTree> {
        self.store
            .read(|conn| assembler::load_tree(conn, &self.registry, document, filter))
    }

    pub fn load_subtrees(&self, ids: &[BlockId]) -> FolioResult<BlockTree> {
        self.store
            .read(|conn| assembler::load_subtrees(conn, &self.registry, ids))
    }

    pub fn check_document(&self, document: DocumentId) -> FolioResult<Vec<Violation>> {
        self.store
            .read(|conn| integrity::check_document(conn, document, self.gap_policy))
    }
}
