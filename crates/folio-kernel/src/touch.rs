//! Freshness hook invoked after structural and content mutations.
//!
//! Runs inside the mutation's transaction, so a failed touch rolls the
//! mutation back with it.

use folio_types::{DocumentId, GroupId};
use rusqlite::{Connection, params};

use crate::error::FolioResult;

/// Records that the blocks of a document or group changed at `at` (Unix ms).
pub trait TouchHook: Send + Sync {
    fn touch_document(&self, conn: &Connection, document: DocumentId, at: u64) -> FolioResult<()>;
    fn touch_group(&self, conn: &Connection, group: GroupId, at: u64) -> FolioResult<()>;
}

/// Writes `blocks_updated_at` on the document and group rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampTouch;

impl TouchHook for TimestampTouch {
    fn touch_document(&self, conn: &Connection, document: DocumentId, at: u64) -> FolioResult<()> {
        conn.execute(
            "UPDATE documents SET blocks_updated_at = ?2 WHERE id = ?1",
            params![document.to_hex(), at as i64],
        )?;
        Ok(())
    }

    fn touch_group(&self, conn: &Connection, group: GroupId, at: u64) -> FolioResult<()> {
        conn.execute(
            "UPDATE block_groups SET blocks_updated_at = ?2 WHERE id = ?1",
            params![group.to_hex(), at as i64],
        )?;
        Ok(())
    }
}

/// Does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTouch;

impl TouchHook for NoTouch {
    fn touch_document(&self, _: &Connection, _: DocumentId, _: u64) -> FolioResult<()> {
        Ok(())
    }

    fn touch_group(&self, _: &Connection, _: GroupId, _: u64) -> FolioResult<()> {
        Ok(())
    }
}

/// Touch a document and every distinct group in `groups`.
pub(crate) fn touch_all(
    hook: &dyn TouchHook,
    conn: &Connection,
    document: DocumentId,
    groups: impl IntoIterator<Item = Option<GroupId>>,
    at: u64,
) -> FolioResult<()> {
    hook.touch_document(conn, document, at)?;
    let mut seen: Vec<GroupId> = Vec::new();
    for group in groups.into_iter().flatten() {
        if !seen.contains(&group) {
            hook.touch_group(conn, group, at)?;
            seen.push(group);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn test_timestamp_touch_sets_both_rows() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        let group = store.create_group(doc.id, "G", None).unwrap();

        store
            .write(|tx| touch_all(&TimestampTouch, tx, doc.id, [Some(group.id), None], 42))
            .unwrap();

        assert_eq!(store.get_document(doc.id).unwrap().unwrap().blocks_updated_at, Some(42));
        assert_eq!(store.get_group(group.id).unwrap().unwrap().blocks_updated_at, Some(42));
    }

    #[test]
    fn test_no_touch_leaves_rows() {
        let store = Store::in_memory().unwrap();
        let doc = store.create_document("Doc", None).unwrap();
        store.write(|tx| touch_all(&NoTouch, tx, doc.id, [None], 42)).unwrap();
        assert_eq!(store.get_document(doc.id).unwrap().unwrap().blocks_updated_at, None);
    }
}
