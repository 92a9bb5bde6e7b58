//! Structural consistency checks for one document.
//!
//! Mutations keep these properties on their own; the checker exists for
//! tests, for `folio check`, and for databases touched by other writers.

use std::collections::{HashMap, HashSet};
use std::fmt;

use folio_types::{Block, BlockId, DocumentId, GroupId, Scope};
use rusqlite::{Connection, params};

use crate::config::GapPolicy;
use crate::error::{FolioError, FolioResult};
use crate::store::{self, BLOCK_COLUMNS, block_from_row};

/// A broken structural property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// Sibling order numbers are not `0..n-1` (or, when gaps are allowed,
    /// contain duplicates).
    Ordering { scope: Scope, order_numbers: Vec<u32> },
    /// A block's group differs from its parent's.
    ScopeMismatch {
        block: BlockId,
        group: Option<GroupId>,
        parent_group: Option<GroupId>,
    },
    /// The block is its own ancestor.
    Cycle { block: BlockId },
    /// The parent is missing or belongs to another document.
    ForeignParent { block: BlockId, parent: BlockId },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Ordering {
                scope,
                order_numbers,
            } => write!(f, "sibling set {scope} has order numbers {order_numbers:?}"),
            Violation::ScopeMismatch {
                block,
                group,
                parent_group,
            } => write!(
                f,
                "block {} is in group {} but its parent is in {}",
                block.short(),
                group.map_or("-".to_string(), |g| g.short()),
                parent_group.map_or("-".to_string(), |g| g.short()),
            ),
            Violation::Cycle { block } => write!(f, "block {} is its own ancestor", block.short()),
            Violation::ForeignParent { block, parent } => write!(
                f,
                "block {} has parent {} outside its document",
                block.short(),
                parent.short()
            ),
        }
    }
}

/// Check every block of `document`.
pub fn check_document(
    conn: &Connection,
    document: DocumentId,
    gap_policy: GapPolicy,
) -> FolioResult<Vec<Violation>> {
    if store::get_document(conn, document)?.is_none() {
        return Err(FolioError::not_found("document", document));
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE document_id = ?1 ORDER BY order_number, id"
    ))?;
    let rows = stmt.query_map(params![document.to_hex()], block_from_row)?;
    let blocks: Vec<Block> = rows.collect::<Result<_, _>>()?;
    let by_id: HashMap<BlockId, &Block> = blocks.iter().map(|b| (b.id, b)).collect();

    let mut violations = Vec::new();

    // Ordering, per sibling set
    let mut sets: HashMap<Scope, Vec<u32>> = HashMap::new();
    for block in &blocks {
        sets.entry(block.scope()).or_default().push(block.order_number);
    }
    let mut scopes: Vec<&Scope> = sets.keys().collect();
    scopes.sort_by_key(|s| (s.group_id, s.parent_id));
    for scope in scopes {
        let order_numbers = &sets[scope];
        let ok = match gap_policy {
            GapPolicy::Compact => order_numbers.iter().copied().eq(0..order_numbers.len() as u32),
            GapPolicy::Preserve => order_numbers.windows(2).all(|w| w[0] < w[1]),
        };
        if !ok {
            violations.push(Violation::Ordering {
                scope: *scope,
                order_numbers: order_numbers.clone(),
            });
        }
    }

    // Parent locality and scope consistency
    for block in &blocks {
        let Some(parent) = block.parent_id else {
            continue;
        };
        match by_id.get(&parent) {
            Some(p) if p.group_id != block.group_id => violations.push(Violation::ScopeMismatch {
                block: block.id,
                group: block.group_id,
                parent_group: p.group_id,
            }),
            Some(_) => {}
            None => violations.push(Violation::ForeignParent {
                block: block.id,
                parent,
            }),
        }
    }

    // Acyclicity
    let mut settled: HashSet<BlockId> = HashSet::new();
    for block in &blocks {
        let mut path = HashSet::new();
        let mut cursor = Some(block.id);
        while let Some(id) = cursor {
            if settled.contains(&id) {
                break;
            }
            if !path.insert(id) {
                if id == block.id {
                    violations.push(Violation::Cycle { block: block.id });
                }
                break;
            }
            cursor = by_id.get(&id).and_then(|b| b.parent_id);
        }
        if !violations
            .iter()
            .any(|v| matches!(v, Violation::Cycle { block: b } if *b == block.id))
        {
            settled.insert(block.id);
        }
    }

    if !violations.is_empty() {
        tracing::warn!(document = %document, count = violations.len(), "integrity violations");
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn raw_block(store: &Store, scope: Scope, order_number: u32) -> BlockId {
        let block = Block {
            id: BlockId::new(),
            document_id: scope.document_id,
            group_id: scope.group_id,
            parent_id: scope.parent_id,
            order_number,
            style_type: Default::default(),
            content_type: None,
            title: Some("x".into()),
            body: None,
            reference: None,
            ref_item: None,
            created_at: 0,
            updated_at: 0,
        };
        store.write(|tx| store::insert_block(tx, &block)).unwrap();
        block.id
    }

    #[test]
    fn test_clean_document() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let root = Scope::root(doc.id);
        let a = raw_block(&store, root, 0);
        raw_block(&store, root, 1);
        raw_block(&store, root.under(a), 0);

        let violations = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Compact))
            .unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_gaps_depend_on_policy() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let root = Scope::root(doc.id);
        raw_block(&store, root, 0);
        raw_block(&store, root, 2);

        let compact = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Compact))
            .unwrap();
        assert_eq!(
            compact,
            vec![Violation::Ordering {
                scope: root,
                order_numbers: vec![0, 2]
            }]
        );
        let preserve = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Preserve))
            .unwrap();
        assert!(preserve.is_empty());

        raw_block(&store, root, 2);
        let preserve = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Preserve))
            .unwrap();
        assert_eq!(preserve.len(), 1);
    }

    #[test]
    fn test_scope_mismatch_and_cycle() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let group = store.create_group(doc.id, "G", None).unwrap();
        let root = Scope::root(doc.id);
        let a = raw_block(&store, root, 0);
        let b = raw_block(&store, root.under(a), 0);
        // child placed in a group its parent is not in
        let c = raw_block(&store, root.in_group(group.id).under(a), 0);

        // close a loop by hand: a -> b -> a
        store
            .write(|tx| {
                tx.execute(
                    "UPDATE blocks SET parent_id = ?1 WHERE id = ?2",
                    params![b.to_hex(), a.to_hex()],
                )?;
                Ok(())
            })
            .unwrap();

        let violations = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Compact))
            .unwrap();
        assert!(violations.contains(&Violation::ScopeMismatch {
            block: c,
            group: Some(group.id),
            parent_group: None,
        }));
        assert!(violations.contains(&Violation::Cycle { block: a }));
        assert!(violations.contains(&Violation::Cycle { block: b }));
        assert!(!violations.contains(&Violation::Cycle { block: c }));
    }

    #[test]
    fn test_foreign_parent() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let other = store.create_document("Other", None).unwrap();
        let elsewhere = raw_block(&store, Scope::root(other.id), 0);
        let stray = raw_block(&store, Scope::root(doc.id).under(elsewhere), 0);

        let violations = store
            .read(|conn| check_document(conn, doc.id, GapPolicy::Compact))
            .unwrap();
        assert_eq!(
            violations,
            vec![Violation::ForeignParent {
                block: stray,
                parent: elsewhere
            }]
        );
    }
}
