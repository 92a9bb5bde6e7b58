//! Tree mutations: create, update, move, delete.
//!
//! Each operation runs against the connection of one write transaction and
//! validates everything it can before its first write. Errors leave the
//! transaction to be rolled back by the caller.

use std::collections::HashSet;

use folio_types::{
    Block, BlockContent, BlockId, ContentType, DocumentId, GroupId, MAX_TITLE_LEN, MoveOutcome,
    MoveRequest, NewBlock, RefItem, Reference, Scope, StyleType, now_millis,
};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::allocator;
use crate::assembler;
use crate::config::GapPolicy;
use crate::error::{FolioError, FolioResult};
use crate::references::ResolverRegistry;
use crate::store;
use crate::touch::{TouchHook, touch_all};

/// Parse a style name, reporting the field on failure.
pub fn parse_style_type(s: &str) -> FolioResult<StyleType> {
    StyleType::from_str(s)
        .ok_or_else(|| FolioError::invalid("style_type", format!("unknown value '{s}'")))
}

/// Parse a content type name, reporting the field on failure.
pub fn parse_content_type(s: &str) -> FolioResult<ContentType> {
    ContentType::from_str(s)
        .ok_or_else(|| FolioError::invalid("content_type", format!("unknown value '{s}'")))
}

/// Trim; empty becomes absent.
fn normalize(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Content fields after normalization and reference resolution.
struct PreparedContent {
    style_type: StyleType,
    content_type: Option<ContentType>,
    title: Option<String>,
    body: Option<String>,
    reference: Option<Reference>,
    ref_item: Option<RefItem>,
}

impl PreparedContent {
    fn apply(self, block: &mut Block) {
        block.style_type = self.style_type;
        block.content_type = self.content_type;
        block.title = self.title;
        block.body = self.body;
        block.reference = self.reference;
        block.ref_item = self.ref_item;
    }
}

/// Performs mutations inside a caller-owned transaction.
pub struct Mutator<'a> {
    pub registry: &'a ResolverRegistry,
    pub touch: &'a dyn TouchHook,
    pub gap_policy: GapPolicy,
}

impl Mutator<'_> {
    // ========================================================================
    // Validation
    // ========================================================================

    fn prepare_content(
        &self,
        conn: &Connection,
        document: DocumentId,
        content: BlockContent,
    ) -> FolioResult<PreparedContent> {
        let title = normalize(content.title);
        if let Some(t) = &title
            && t.chars().count() > MAX_TITLE_LEN
        {
            return Err(FolioError::invalid(
                "title",
                format!("longer than {MAX_TITLE_LEN} characters"),
            ));
        }
        let body = normalize(content.body);
        if content.reference.is_none() && title.is_none() && body.is_none() {
            return Err(FolioError::invalid(
                "block",
                "needs a reference, a title or a body",
            ));
        }

        let (reference, ref_item) = match &content.reference {
            Some(input) => {
                let (r, item) = self.registry.prepare(conn, document, input)?;
                (Some(r), Some(item))
            }
            None => (None, None),
        };

        Ok(PreparedContent {
            style_type: content.style_type,
            content_type: content.content_type,
            title,
            body,
            reference,
            ref_item,
        })
    }

    /// The document exists, the group is one of its groups, and the parent is
    /// one of its blocks inside that group.
    fn check_scope(conn: &Connection, scope: &Scope) -> FolioResult<()> {
        let document = scope.document_id;
        if store::get_document(conn, document)?.is_none() {
            return Err(FolioError::not_found("document", document));
        }
        if let Some(group) = scope.group_id {
            check_group(conn, document, group)?;
        }
        if let Some(parent) = scope.parent_id {
            match store::get_block(conn, parent)? {
                Some(p) if p.document_id == document && p.group_id == scope.group_id => {}
                _ => return Err(FolioError::not_found("parent block", parent)),
            }
        }
        Ok(())
    }

    fn check_anchor(conn: &Connection, scope: &Scope, anchor: BlockId) -> FolioResult<()> {
        match store::get_block(conn, anchor)? {
            Some(b) if b.scope() == *scope => Ok(()),
            _ => Err(FolioError::not_found("insert-before block", anchor)),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Insert a block at the requested position of its scope.
    pub fn create_block(&self, conn: &Connection, request: NewBlock) -> FolioResult<Block> {
        let NewBlock {
            scope,
            insert_before,
            content,
        } = request;

        Self::check_scope(conn, &scope)?;
        if let Some(anchor) = insert_before {
            Self::check_anchor(conn, &scope, anchor)?;
        }
        let prepared = self.prepare_content(conn, scope.document_id, content)?;

        let order_number = allocator::allocate(conn, &scope, insert_before, 1, &[])?;
        let now = now_millis();
        let mut block = Block {
            id: BlockId::new(),
            document_id: scope.document_id,
            group_id: scope.group_id,
            parent_id: scope.parent_id,
            order_number,
            style_type: StyleType::default(),
            content_type: None,
            title: None,
            body: None,
            reference: None,
            ref_item: None,
            created_at: now,
            updated_at: now,
        };
        prepared.apply(&mut block);
        store::insert_block(conn, &block)?;

        touch_all(self.touch, conn, scope.document_id, [scope.group_id], now)?;
        Ok(block)
    }

    /// Rewrite the content of a block. Position and scope are untouched.
    pub fn update_block(
        &self,
        conn: &Connection,
        id: BlockId,
        content: BlockContent,
    ) -> FolioResult<Block> {
        let mut block =
            store::get_block(conn, id)?.ok_or_else(|| FolioError::not_found("block", id))?;
        let prepared = self.prepare_content(conn, block.document_id, content)?;

        prepared.apply(&mut block);
        block.updated_at = now_millis();
        store::update_block_content(conn, &block)?;

        touch_all(
            self.touch,
            conn,
            block.document_id,
            [block.group_id],
            block.updated_at,
        )?;
        Ok(block)
    }

    /// Relocate an ordered selection of siblings, re-scoping their subtrees
    /// when the group changes.
    pub fn move_blocks(&self, conn: &Connection, request: MoveRequest) -> FolioResult<MoveOutcome> {
        let MoveRequest {
            block_ids,
            target_group,
            target_parent,
            insert_before,
        } = request;

        // Selection
        if block_ids.is_empty() {
            return Err(FolioError::invalid("block_ids", "no blocks selected"));
        }
        let mut seen = HashSet::with_capacity(block_ids.len());
        if let Some(dup) = block_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(FolioError::invalid(
                "block_ids",
                format!("{dup} is listed more than once"),
            ));
        }
        let count = u32::try_from(block_ids.len())
            .map_err(|_| FolioError::invalid("block_ids", "too many blocks selected"))?;

        let mut source: Option<Scope> = None;
        for &id in &block_ids {
            let block =
                store::get_block(conn, id)?.ok_or_else(|| FolioError::not_found("block", id))?;
            match source {
                None => source = Some(block.scope()),
                Some(s) if s.document_id != block.document_id => {
                    return Err(FolioError::invalid(
                        "block_ids",
                        "blocks belong to different documents",
                    ));
                }
                Some(s) if s != block.scope() => {
                    return Err(FolioError::invalid(
                        "block_ids",
                        "blocks must share one group and parent",
                    ));
                }
                Some(_) => {}
            }
        }
        let Some(source) = source else {
            return Err(FolioError::invalid("block_ids", "no blocks selected"));
        };
        let document = source.document_id;

        // Target
        if let Some(group) = target_group {
            match store::get_group(conn, group)? {
                Some(g) if g.document_id == document => {}
                _ => return Err(FolioError::not_found("target group", group)),
            }
        }
        if let Some(parent) = target_parent {
            if block_ids.contains(&parent) {
                return Err(FolioError::invalid(
                    "target_parent",
                    "a block cannot be moved under itself",
                ));
            }
            match store::get_block(conn, parent)? {
                Some(p) if p.document_id == document && p.group_id == target_group => {}
                _ => return Err(FolioError::not_found("target parent", parent)),
            }
            if ancestors(conn, parent)?.iter().any(|a| block_ids.contains(a)) {
                return Err(FolioError::invalid(
                    "target_parent",
                    "a block cannot be moved into its own subtree",
                ));
            }
        }
        let target = Scope {
            document_id: document,
            group_id: target_group,
            parent_id: target_parent,
        };
        if let Some(anchor) = insert_before {
            if block_ids.contains(&anchor) {
                return Err(FolioError::invalid(
                    "insert_before",
                    "cannot insert before a block that is being moved",
                ));
            }
            Self::check_anchor(conn, &target, anchor)?;
        }

        // Writes
        if self.gap_policy == GapPolicy::Compact {
            allocator::compact(conn, &source, &block_ids)?;
        }
        let start = allocator::allocate(conn, &target, insert_before, count, &block_ids)?;
        let now = now_millis();
        for (offset, &id) in (0u32..).zip(&block_ids) {
            store::place_block(conn, id, target_group, target_parent, start + offset, now)?;
        }

        let rescoped = source.group_id != target_group;
        if rescoped {
            let descendants = rescope_descendants(conn, &block_ids, target_group)?;
            tracing::debug!(moved = block_ids.len(), descendants, "re-scoped subtrees");
        }

        touch_all(
            self.touch,
            conn,
            document,
            [source.group_id, target_group],
            now,
        )?;

        if rescoped {
            let tree = assembler::load_subtrees(conn, self.registry, &block_ids)?;
            Ok(MoveOutcome::Rescoped(
                tree.into_walk().map(|(_, block)| block).collect(),
            ))
        } else {
            Ok(MoveOutcome::Reordered)
        }
    }

    /// Remove a block and its subtree. Returns the number of blocks removed.
    pub fn delete_block(&self, conn: &Connection, id: BlockId) -> FolioResult<usize> {
        let block =
            store::get_block(conn, id)?.ok_or_else(|| FolioError::not_found("block", id))?;

        let removed = store::delete_subtrees(conn, "id = ?1", &[Value::Text(id.to_hex())])?;

        let scope = block.scope();
        if self.gap_policy == GapPolicy::Compact {
            allocator::compact(conn, &scope, &[])?;
        }
        touch_all(self.touch, conn, block.document_id, [block.group_id], now_millis())?;
        Ok(removed)
    }
}

fn check_group(conn: &Connection, document: DocumentId, group: GroupId) -> FolioResult<()> {
    match store::get_group(conn, group)? {
        Some(g) if g.document_id == document => Ok(()),
        _ => Err(FolioError::not_found("group", group)),
    }
}

// ============================================================================
// Recursive queries
// ============================================================================

/// Every ancestor of `id`, nearest first.
pub(crate) fn ancestors(conn: &Connection, id: BlockId) -> FolioResult<Vec<BlockId>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE chain(id, depth) AS (
             SELECT parent_id, 1 FROM blocks WHERE id = ?1 AND parent_id IS NOT NULL
             UNION
             SELECT b.parent_id, c.depth + 1 FROM blocks b JOIN chain c ON b.id = c.id
             WHERE b.parent_id IS NOT NULL AND c.depth < 100000
         )
         SELECT id FROM chain ORDER BY depth",
    )?;
    let rows = stmt.query_map(params![id.to_hex()], |row| store::id_col::<BlockId>(row, 0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Set `group_id` on every descendant of `roots` in one statement.
fn rescope_descendants(
    conn: &Connection,
    roots: &[BlockId],
    group: Option<GroupId>,
) -> FolioResult<usize> {
    let placeholders: Vec<String> = (2..roots.len() + 2).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "WITH RECURSIVE descendants(id) AS (
             SELECT id FROM blocks WHERE parent_id IN ({})
             UNION
             SELECT b.id FROM blocks b JOIN descendants d ON b.parent_id = d.id
         )
         UPDATE blocks SET group_id = ?1 WHERE id IN (SELECT id FROM descendants)",
        placeholders.join(", ")
    );
    let mut values = vec![group.map_or(Value::Null, |g| Value::Text(g.to_hex()))];
    values.extend(roots.iter().map(|id| Value::Text(id.to_hex())));
    Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Folio;
    use crate::error::ErrorKind;
    use folio_types::{NewReference, ReferenceInput};

    fn setup() -> (Folio, DocumentId) {
        let folio = Folio::in_memory().unwrap();
        let doc = folio.store().create_document("Doc", None).unwrap();
        (folio, doc.id)
    }

    fn add(folio: &Folio, scope: Scope, title: &str) -> BlockId {
        folio
            .create_block(NewBlock::append(scope, BlockContent::titled(title)))
            .unwrap()
            .id
    }

    #[test]
    fn test_parse_enums_name_the_field() {
        assert_eq!(parse_style_type("numbered").unwrap(), StyleType::Numbered);
        let err = parse_style_type("checkbox").unwrap_err();
        assert!(err.to_string().starts_with("invalid style_type"));
        let err = parse_content_type("rtf").unwrap_err();
        assert!(err.to_string().starts_with("invalid content_type"));
    }

    #[test]
    fn test_create_normalizes_text() {
        let (folio, doc) = setup();
        let content = BlockContent::titled("  Heading  ").with_body("   ");
        let block = folio
            .create_block(NewBlock::append(Scope::root(doc), content))
            .unwrap();
        assert_eq!(block.title.as_deref(), Some("Heading"));
        assert_eq!(block.body, None);
        assert_eq!(block.order_number, 0);
    }

    #[test]
    fn test_blank_block_rejected() {
        let (folio, doc) = setup();
        let content = BlockContent::titled("   ").with_body("\n");
        let err = folio
            .create_block(NewBlock::append(Scope::root(doc), content))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_title_limit() {
        let (folio, doc) = setup();
        let ok = BlockContent::titled("é".repeat(MAX_TITLE_LEN));
        assert!(folio.create_block(NewBlock::append(Scope::root(doc), ok)).is_ok());

        let long = BlockContent::titled("é".repeat(MAX_TITLE_LEN + 1));
        let err = folio
            .create_block(NewBlock::append(Scope::root(doc), long))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_checks_scope_membership() {
        let (folio, doc) = setup();
        let other = folio.store().create_document("Other", None).unwrap();
        let foreign_group = folio.store().create_group(other.id, "G", None).unwrap();
        let foreign_parent = add(&folio, Scope::root(other.id), "P");

        let err = folio
            .create_block(NewBlock::append(
                Scope::root(doc).in_group(foreign_group.id),
                BlockContent::titled("x"),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = folio
            .create_block(NewBlock::append(
                Scope::root(doc).under(foreign_parent),
                BlockContent::titled("x"),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // parent exists in the document but outside the requested group
        let group = folio.store().create_group(doc, "G", None).unwrap();
        let ungrouped = add(&folio, Scope::root(doc), "U");
        let err = folio
            .create_block(NewBlock::append(
                Scope::root(doc).in_group(group.id).under(ungrouped),
                BlockContent::titled("x"),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_failed_create_leaves_no_inline_reference() {
        let (folio, doc) = setup();
        let content = BlockContent::default()
            .with_reference(ReferenceInput::Create(NewReference::group("Appendix")));
        let err = folio
            .create_block(NewBlock::before(Scope::root(doc), BlockId::new(), content))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(folio.store().list_groups(doc).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_position() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        add(&folio, root, "A");
        let b = add(&folio, root, "B");

        let edited = folio
            .update_block(
                b,
                BlockContent::titled("B!")
                    .with_style(StyleType::Numbered)
                    .with_content_type(ContentType::Markdown),
            )
            .unwrap();
        assert_eq!(edited.order_number, 1);
        assert_eq!(edited.title.as_deref(), Some("B!"));

        let stored = folio.store().get_block(b).unwrap().unwrap();
        assert_eq!(stored.style_type, StyleType::Numbered);
        assert_eq!(stored.content_type, Some(ContentType::Markdown));
        assert_eq!(stored.order_number, 1);
    }

    #[test]
    fn test_update_unknown_block() {
        let (folio, _) = setup();
        let err = folio
            .update_block(BlockId::new(), BlockContent::titled("x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_move_selection_validation() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        let a = add(&folio, root, "A");
        let b = add(&folio, root, "B");
        let a1 = add(&folio, root.under(a), "A1");

        let kind = |req: MoveRequest| folio.move_blocks(req).unwrap_err().kind();

        assert_eq!(kind(MoveRequest::new(Vec::new(), None)), ErrorKind::InvalidArgument);
        assert_eq!(kind(MoveRequest::new([a, a], None)), ErrorKind::InvalidArgument);
        assert_eq!(kind(MoveRequest::new([BlockId::new()], None)), ErrorKind::NotFound);
        assert_eq!(kind(MoveRequest::new([a, a1], None)), ErrorKind::InvalidArgument);
        assert_eq!(kind(MoveRequest::new([a], None).before(a)), ErrorKind::InvalidArgument);
        assert_eq!(kind(MoveRequest::new([a], None).before(a1)), ErrorKind::NotFound);
        assert_eq!(
            kind(MoveRequest::new([a], Some(GroupId::new()))),
            ErrorKind::NotFound
        );
        assert_eq!(kind(MoveRequest::new([b], None).under(BlockId::new())), ErrorKind::NotFound);
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        let a = add(&folio, root, "A");
        let a1 = add(&folio, root.under(a), "A1");
        let a1x = add(&folio, root.under(a1), "A1x");

        for target in [a, a1, a1x] {
            let err = folio.move_blocks(MoveRequest::new([a], None).under(target)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(folio.store().get_block(a).unwrap().unwrap().parent_id, None);
    }

    #[test]
    fn test_reparent_within_group_is_reordered() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        let a = add(&folio, root, "A");
        let b = add(&folio, root, "B");
        let c = add(&folio, root, "C");

        let outcome = folio.move_blocks(MoveRequest::new([c], None).under(a)).unwrap();
        assert_eq!(outcome, MoveOutcome::Reordered);

        let moved = folio.store().get_block(c).unwrap().unwrap();
        assert_eq!(moved.parent_id, Some(a));
        assert_eq!(moved.order_number, 0);
        assert_eq!(folio.store().get_block(b).unwrap().unwrap().order_number, 1);
    }

    #[test]
    fn test_delete_counts_subtree() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        let a = add(&folio, root, "A");
        let b = add(&folio, root, "B");
        let a1 = add(&folio, root.under(a), "A1");
        add(&folio, root.under(a1), "A1x");
        add(&folio, root.under(a), "A2");

        assert_eq!(folio.delete_block(a).unwrap(), 4);
        assert_eq!(folio.store().get_block(b).unwrap().unwrap().order_number, 0);
        assert!(folio.store().get_block(a1).unwrap().is_none());

        let err = folio.delete_block(a).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let (folio, doc) = setup();
        let root = Scope::root(doc);
        let a = add(&folio, root, "A");
        let a1 = add(&folio, root.under(a), "A1");
        let a1x = add(&folio, root.under(a1), "A1x");

        let chain = folio.store().read(|conn| ancestors(conn, a1x)).unwrap();
        assert_eq!(chain, vec![a1, a]);
        assert!(folio.store().read(|conn| ancestors(conn, a)).unwrap().is_empty());
    }
}
