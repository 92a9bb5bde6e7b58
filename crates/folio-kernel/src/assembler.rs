//! Read assembly: flat block rows in, ordered tree out.
//!
//! Rows are loaded in one query ordered by `(parent_id, group_id,
//! order_number)`, hydrated through the resolver registry, and linked into an
//! arena: nodes live in one `Vec`, child lists hold indices. Roots come out
//! document-level first, then by group, each list in sibling order.

use std::collections::{HashMap, HashSet};

use folio_types::{Block, BlockId, BlockNode, DocumentId, GroupId};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::error::{FolioError, FolioResult};
use crate::references::ResolverRegistry;
use crate::store::{self, BLOCK_COLUMNS, block_from_row};

/// Which blocks of a document to load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupFilter {
    /// Every block, document-level and grouped.
    #[default]
    All,
    /// Only blocks scoped directly to the document.
    Document,
    /// Only blocks inside one group.
    Group(GroupId),
}

#[derive(Debug)]
struct TreeNode {
    block: Block,
    children: Vec<usize>,
}

/// Arena tree of hydrated blocks.
#[derive(Debug)]
pub struct BlockTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    index: HashMap<BlockId, usize>,
}

impl BlockTree {
    /// Link `blocks` into a tree.
    ///
    /// `blocks` must already be in sibling order. With `roots` given, those
    /// ids become the roots in that order; otherwise every block without a
    /// loaded parent is a root.
    fn link(blocks: Vec<Block>, roots: Option<&[BlockId]>) -> Self {
        let index: HashMap<BlockId, usize> =
            blocks.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
        let mut nodes: Vec<TreeNode> = blocks
            .into_iter()
            .map(|block| TreeNode {
                block,
                children: Vec::new(),
            })
            .collect();

        let forced: Option<Vec<usize>> =
            roots.map(|ids| ids.iter().filter_map(|id| index.get(id).copied()).collect());
        let forced_set: HashSet<usize> = forced.iter().flatten().copied().collect();
        let mut found_roots = Vec::new();

        for i in 0..nodes.len() {
            if forced_set.contains(&i) {
                continue;
            }
            let parent_id = nodes[i].block.parent_id;
            match parent_id {
                Some(parent) => match index.get(&parent) {
                    Some(&p) => nodes[p].children.push(i),
                    None => {
                        tracing::warn!(
                            block = %nodes[i].block.id,
                            parent = %parent,
                            "parent not loaded, showing block at root"
                        );
                        found_roots.push(i);
                    }
                },
                None => found_roots.push(i),
            }
        }

        Self {
            nodes,
            roots: forced.unwrap_or(found_roots),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.index.get(&id).map(|&i| &self.nodes[i].block)
    }

    /// Root blocks in display order.
    pub fn roots(&self) -> impl Iterator<Item = &Block> + '_ {
        self.roots.iter().map(|&i| &self.nodes[i].block)
    }

    /// Children of `id` in sibling order. Empty if `id` is not loaded.
    pub fn children(&self, id: BlockId) -> impl Iterator<Item = &Block> + '_ {
        self.index
            .get(&id)
            .map(|&i| self.nodes[i].children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&c| &self.nodes[c].block)
    }

    /// Convert to nested nodes, consuming the arena.
    ///
    /// Built bottom-up from an explicit stack, so depth is bounded by memory
    /// rather than the call stack.
    pub fn into_nodes(self) -> Vec<BlockNode> {
        let mut slots: Vec<Option<TreeNode>> = self.nodes.into_iter().map(Some).collect();
        let mut built: Vec<Option<BlockNode>> = slots.iter().map(|_| None).collect();
        let mut stack: Vec<(usize, bool)> = self.roots.iter().rev().map(|&r| (r, false)).collect();

        while let Some((idx, children_done)) = stack.pop() {
            if children_done {
                let Some(node) = slots[idx].take() else {
                    continue;
                };
                let children = node
                    .children
                    .iter()
                    .filter_map(|&c| built[c].take())
                    .collect();
                built[idx] = Some(BlockNode {
                    block: node.block,
                    children,
                });
            } else if let Some(node) = &slots[idx] {
                stack.push((idx, true));
                stack.extend(node.children.iter().rev().map(|&c| (c, false)));
            }
        }

        self.roots.iter().filter_map(|&r| built[r].take()).collect()
    }

    /// Depth-first walk yielding `(depth, block)`, parents before children.
    pub fn into_walk(self) -> Walk {
        let stack = self.roots.iter().rev().map(|&r| (0, r)).collect();
        Walk {
            slots: self.nodes.into_iter().map(Some).collect(),
            stack,
        }
    }
}

/// One-shot depth-first iterator from [`BlockTree::into_walk`].
pub struct Walk {
    slots: Vec<Option<TreeNode>>,
    stack: Vec<(usize, usize)>,
}

impl Iterator for Walk {
    type Item = (usize, Block);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (depth, idx) = self.stack.pop()?;
            let Some(node) = self.slots[idx].take() else {
                continue;
            };
            self.stack
                .extend(node.children.iter().rev().map(|&c| (depth + 1, c)));
            return Some((depth, node.block));
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

const TREE_ORDER: &str = "ORDER BY parent_id, group_id, order_number, id";

fn query_blocks(
    conn: &Connection,
    registry: &ResolverRegistry,
    sql: &str,
    values: Vec<Value>,
) -> FolioResult<Vec<Block>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), block_from_row)?;
    let mut blocks = rows.collect::<Result<Vec<_>, _>>()?;
    for block in &mut blocks {
        hydrate(conn, registry, block)?;
    }
    Ok(blocks)
}

/// Fill in `ref_item`; a reference that no longer resolves stays `None`.
pub(crate) fn hydrate(
    conn: &Connection,
    registry: &ResolverRegistry,
    block: &mut Block,
) -> FolioResult<()> {
    if let Some(reference) = &block.reference {
        block.ref_item = registry.hydrate(conn, block.document_id, reference)?;
        if block.ref_item.is_none() {
            tracing::debug!(block = %block.id, ref_type = %reference.ref_type, "reference unavailable");
        }
    }
    Ok(())
}

/// Load the blocks of `document` selected by `filter` as a tree.
pub fn load_tree(
    conn: &Connection,
    registry: &ResolverRegistry,
    document: DocumentId,
    filter: GroupFilter,
) -> FolioResult<BlockTree> {
    if store::get_document(conn, document)?.is_none() {
        return Err(FolioError::not_found("document", document));
    }

    let mut values = vec![Value::Text(document.to_hex())];
    let condition = match filter {
        GroupFilter::All => "",
        GroupFilter::Document => " AND group_id IS NULL",
        GroupFilter::Group(group) => {
            match store::get_group(conn, group)? {
                Some(g) if g.document_id == document => {}
                _ => return Err(FolioError::not_found("group", group)),
            }
            values.push(Value::Text(group.to_hex()));
            " AND group_id = ?2"
        }
    };
    let sql =
        format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE document_id = ?1{condition} {TREE_ORDER}");
    let blocks = query_blocks(conn, registry, &sql, values)?;
    Ok(BlockTree::link(blocks, None))
}

/// Load `ids` and everything below them; the tree's roots are `ids` in the
/// given order.
pub fn load_subtrees(
    conn: &Connection,
    registry: &ResolverRegistry,
    ids: &[BlockId],
) -> FolioResult<BlockTree> {
    if ids.is_empty() {
        return Ok(BlockTree::link(Vec::new(), Some(ids)));
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM blocks WHERE id IN ({})
             UNION
             SELECT b.id FROM blocks b JOIN subtree s ON b.parent_id = s.id
         )
         SELECT {BLOCK_COLUMNS} FROM blocks WHERE id IN (SELECT id FROM subtree) {TREE_ORDER}",
        placeholders.join(", ")
    );
    let values = ids.iter().map(|id| Value::Text(id.to_hex())).collect();
    let blocks = query_blocks(conn, registry, &sql, values)?;
    let tree = BlockTree::link(blocks, Some(ids));
    if let Some(missing) = ids.iter().find(|id| tree.get(**id).is_none()) {
        return Err(FolioError::not_found("block", missing));
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{Store, insert_block};
    use folio_types::{Reference, Scope, StyleType};

    fn add(store: &Store, scope: Scope, order_number: u32, title: &str) -> BlockId {
        let block = Block {
            id: BlockId::new(),
            document_id: scope.document_id,
            group_id: scope.group_id,
            parent_id: scope.parent_id,
            order_number,
            style_type: StyleType::Bullet,
            content_type: None,
            title: Some(title.into()),
            body: None,
            reference: None,
            ref_item: None,
            created_at: 0,
            updated_at: 0,
        };
        store.write(|tx| insert_block(tx, &block)).unwrap();
        block.id
    }

    fn titles<'a>(blocks: impl Iterator<Item = &'a Block>) -> Vec<String> {
        blocks.map(Block::label).collect()
    }

    #[test]
    fn test_tree_links_children_in_order() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let root = Scope::root(doc.id);
        // inserted out of order on purpose
        let b = add(&store, root, 1, "B");
        let a = add(&store, root, 0, "A");
        add(&store, root.under(a), 1, "A2");
        add(&store, root.under(a), 0, "A1");

        let registry = ResolverRegistry::default();
        let tree = store
            .read(|conn| load_tree(conn, &registry, doc.id, GroupFilter::All))
            .unwrap();

        assert_eq!(tree.len(), 4);
        assert_eq!(titles(tree.roots()), vec!["A", "B"]);
        assert_eq!(titles(tree.children(a)), vec!["A1", "A2"]);
        assert_eq!(tree.children(b).count(), 0);
        assert_eq!(tree.children(BlockId::new()).count(), 0);

        let walked: Vec<(usize, String)> =
            tree.into_walk().map(|(d, b)| (d, b.label())).collect();
        assert_eq!(
            walked,
            vec![
                (0, "A".to_string()),
                (1, "A1".to_string()),
                (1, "A2".to_string()),
                (0, "B".to_string()),
            ]
        );
    }

    #[test]
    fn test_group_filters() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let group = store.create_group(doc.id, "G", None).unwrap();
        add(&store, Scope::root(doc.id), 0, "top");
        add(&store, Scope::root(doc.id).in_group(group.id), 0, "grouped");

        let registry = ResolverRegistry::default();
        let load = |filter: GroupFilter| {
            store
                .read(|conn| load_tree(conn, &registry, doc.id, filter))
                .unwrap()
        };

        assert_eq!(titles(load(GroupFilter::All).roots()), vec!["top", "grouped"]);
        assert_eq!(titles(load(GroupFilter::Document).roots()), vec!["top"]);
        assert_eq!(titles(load(GroupFilter::Group(group.id)).roots()), vec!["grouped"]);

        let err = store
            .read(|conn| load_tree(conn, &registry, doc.id, GroupFilter::Group(GroupId::new())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_subtrees_keep_requested_order() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let root = Scope::root(doc.id);
        let a = add(&store, root, 0, "A");
        let b = add(&store, root, 1, "B");
        let a1 = add(&store, root.under(a), 0, "A1");
        add(&store, root.under(a1), 0, "A1x");

        let registry = ResolverRegistry::default();
        let nodes = store
            .read(|conn| load_subtrees(conn, &registry, &[b, a]))
            .unwrap()
            .into_nodes();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].block.id, b);
        assert_eq!(nodes[1].block.id, a);
        assert_eq!(nodes[1].len(), 3);
        assert_eq!(nodes[1].children[0].children[0].block.label(), "A1x");
    }

    #[test]
    fn test_subtrees_unknown_id() {
        let store = Store::in_memory().unwrap();
        let registry = ResolverRegistry::default();
        let err = store
            .read(|conn| load_subtrees(conn, &registry, &[BlockId::new()]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_dangling_reference_is_unavailable() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let target = store.create_group(doc.id, "Gone soon", None).unwrap();

        let mut block = Block {
            id: BlockId::new(),
            document_id: doc.id,
            group_id: None,
            parent_id: None,
            order_number: 0,
            style_type: StyleType::Bullet,
            content_type: None,
            title: None,
            body: None,
            reference: Some(Reference::group(target.id)),
            ref_item: None,
            created_at: 0,
            updated_at: 0,
        };
        store.write(|tx| insert_block(tx, &block)).unwrap();
        let registry = ResolverRegistry::default();

        let tree = store
            .read(|conn| load_tree(conn, &registry, doc.id, GroupFilter::All))
            .unwrap();
        assert!(!tree.get(block.id).unwrap().ref_unavailable());

        store.delete_group(target.id).unwrap();
        let tree = store
            .read(|conn| load_tree(conn, &registry, doc.id, GroupFilter::All))
            .unwrap();
        block = tree.get(block.id).unwrap().clone();
        assert!(block.ref_unavailable());
        assert_eq!(block.label(), "<group unavailable>");
    }
}
