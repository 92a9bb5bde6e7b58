//! SQLite persistence for documents, groups, URL records and blocks.
//!
//! Every mutation runs inside [`Store::write`], which opens a
//! `BEGIN IMMEDIATE` transaction: the database write lock is held from the
//! first read, so order numbers computed inside the transaction cannot go
//! stale before commit. Readers go through [`Store::read`] and see one
//! consistent snapshot.
//!
//! Row helpers in this module take a plain `&Connection`; a `Transaction`
//! derefs to one, so the same helpers serve reads and writes.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use folio_types::{
    Block, BlockId, ContentType, Document, DocumentId, Group, GroupId, RefId, RefType,
    Reference, StyleType, UrlId, UrlRecord, now_millis, truncate_group_name,
};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params,
    params_from_iter,
};

use crate::config::DatabaseConfig;
use crate::error::{ErrorKind, FolioError, FolioResult};

const SCHEMA: &str = r#"
-- Documents own everything below them
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL,
    blocks_updated_at INTEGER
);

-- Optional named partitions of a document
CREATE TABLE IF NOT EXISTS block_groups (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL,
    blocks_updated_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_block_groups_document ON block_groups(document_id);

-- Reference targets; metadata is supplied by the caller
CREATE TABLE IF NOT EXISTS urls (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    title TEXT,
    description TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_urls_document ON urls(document_id);

-- Outline nodes. A sibling set is (document_id, group_id, parent_id).
-- order_number is not unique-indexed: shifting a set happens in one UPDATE
-- and passes through transient duplicates.
CREATE TABLE IF NOT EXISTS blocks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    group_id TEXT REFERENCES block_groups(id) ON DELETE CASCADE,
    parent_id TEXT REFERENCES blocks(id) ON DELETE CASCADE,
    order_number INTEGER NOT NULL CHECK (order_number >= 0),
    style_type TEXT NOT NULL,
    content_type TEXT,
    ref_type TEXT,
    ref_id TEXT,
    title TEXT,
    body TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK ((ref_type IS NULL) = (ref_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_blocks_scope
    ON blocks(document_id, group_id, parent_id, order_number);
CREATE INDEX IF NOT EXISTS idx_blocks_parent ON blocks(parent_id);
"#;

/// Column list matching [`block_from_row`].
pub(crate) const BLOCK_COLUMNS: &str = "id, document_id, group_id, parent_id, order_number, \
     style_type, content_type, ref_type, ref_id, title, body, created_at, updated_at";

/// Database handle for outline persistence.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database described by `config`.
    pub fn open(config: &DatabaseConfig) -> FolioResult<Self> {
        if let Some(dir) = config.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout())?;
        if config.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        Self::init(conn)
    }

    /// Open a database file with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> FolioResult<Self> {
        Self::open(&DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> FolioResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(Duration::from_millis(0))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> FolioResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside an IMMEDIATE transaction. Any error rolls back.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> FolioResult<T>) -> FolioResult<T> {
        let mut conn = self.conn.lock();
        let result = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(FolioError::from)
            .and_then(|tx| {
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            });
        if let Err(e) = &result {
            log_failure(e);
        }
        result
    }

    /// Run `f` against a read snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> FolioResult<T>) -> FolioResult<T> {
        let mut conn = self.conn.lock();
        let result = conn.transaction().map_err(FolioError::from).and_then(|tx| {
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        });
        if let Err(e) = &result {
            log_failure(e);
        }
        result
    }

    // =========================================================================
    // Document management surface
    // =========================================================================

    pub fn create_document(&self, name: &str, description: Option<&str>) -> FolioResult<Document> {
        self.write(|tx| insert_document(tx, name, description))
    }

    pub fn get_document(&self, id: DocumentId) -> FolioResult<Option<Document>> {
        self.read(|conn| get_document(conn, id))
    }

    pub fn list_documents(&self) -> FolioResult<Vec<Document>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, created_at, blocks_updated_at
                 FROM documents ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map([], document_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Delete a document and everything it owns. Returns false if it did not exist.
    pub fn delete_document(&self, id: DocumentId) -> FolioResult<bool> {
        self.write(|tx| {
            delete_subtrees(
                tx,
                "document_id = ?1 AND parent_id IS NULL",
                &[Value::Text(id.to_hex())],
            )?;
            let n = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_hex()])?;
            Ok(n > 0)
        })
    }

    pub fn create_group(
        &self,
        document_id: DocumentId,
        name: &str,
        description: Option<&str>,
    ) -> FolioResult<Group> {
        self.write(|tx| {
            get_document(tx, document_id)?
                .ok_or_else(|| FolioError::not_found("document", document_id))?;
            insert_group(tx, document_id, name, description)
        })
    }

    pub fn get_group(&self, id: GroupId) -> FolioResult<Option<Group>> {
        self.read(|conn| get_group(conn, id))
    }

    pub fn list_groups(&self, document_id: DocumentId) -> FolioResult<Vec<Group>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, name, description, created_at, blocks_updated_at
                 FROM block_groups WHERE document_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![document_id.to_hex()], group_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Delete a group and the blocks scoped in it. Blocks elsewhere that
    /// reference the group keep the reference; it reads back as unavailable.
    pub fn delete_group(&self, id: GroupId) -> FolioResult<bool> {
        self.write(|tx| {
            delete_subtrees(
                tx,
                "group_id = ?1 AND (parent_id IS NULL OR parent_id NOT IN
                     (SELECT id FROM blocks WHERE group_id = ?1))",
                &[Value::Text(id.to_hex())],
            )?;
            let n = tx.execute("DELETE FROM block_groups WHERE id = ?1", params![id.to_hex()])?;
            Ok(n > 0)
        })
    }

    pub fn create_url(
        &self,
        document_id: DocumentId,
        url: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> FolioResult<UrlRecord> {
        self.write(|tx| {
            get_document(tx, document_id)?
                .ok_or_else(|| FolioError::not_found("document", document_id))?;
            insert_url(tx, document_id, url, title, description)
        })
    }

    pub fn get_block(&self, id: BlockId) -> FolioResult<Option<Block>> {
        self.read(|conn| get_block(conn, id))
    }
}

fn log_failure(e: &FolioError) {
    match e.kind() {
        ErrorKind::Conflict => tracing::warn!(error = ?e, "write lock not acquired"),
        ErrorKind::Internal => tracing::error!(error = ?e, "storage failure"),
        _ => {}
    }
}

// =============================================================================
// Column decoding
// =============================================================================

fn conversion_error(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

/// Decode a hex TEXT column into a typed id.
pub(crate) fn id_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_id_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn enum_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| conversion_error(idx, format!("unknown value '{text}'")))
}

fn millis_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn opt_millis_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v.max(0) as u64))
}

/// Map a row selected with [`BLOCK_COLUMNS`].
pub(crate) fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let ref_type: Option<RefType> = match row.get::<_, Option<String>>(7)? {
        Some(text) => Some(
            RefType::from_str(&text)
                .ok_or_else(|| conversion_error(7, format!("unknown ref_type '{text}'")))?,
        ),
        None => None,
    };
    let ref_id: Option<RefId> = opt_id_col(row, 8)?;
    let content_type = match row.get::<_, Option<String>>(6)? {
        Some(text) => Some(
            ContentType::from_str(&text)
                .ok_or_else(|| conversion_error(6, format!("unknown content_type '{text}'")))?,
        ),
        None => None,
    };

    Ok(Block {
        id: id_col(row, 0)?,
        document_id: id_col(row, 1)?,
        group_id: opt_id_col(row, 2)?,
        parent_id: opt_id_col(row, 3)?,
        order_number: row.get(4)?,
        style_type: enum_col(row, 5, StyleType::from_str)?,
        content_type,
        reference: ref_type.zip(ref_id).map(|(t, id)| Reference::new(t, id)),
        ref_item: None,
        title: row.get(9)?,
        body: row.get(10)?,
        created_at: millis_col(row, 11)?,
        updated_at: millis_col(row, 12)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: id_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: millis_col(row, 3)?,
        blocks_updated_at: opt_millis_col(row, 4)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: id_col(row, 0)?,
        document_id: id_col(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: millis_col(row, 4)?,
        blocks_updated_at: opt_millis_col(row, 5)?,
    })
}

fn url_from_row(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        id: id_col(row, 0)?,
        document_id: id_col(row, 1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        created_at: millis_col(row, 5)?,
    })
}

// =============================================================================
// Documents, groups, URLs
// =============================================================================

pub(crate) fn insert_document(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> FolioResult<Document> {
    let doc = Document {
        id: DocumentId::new(),
        name: name.trim().to_string(),
        description: description.map(str::to_string),
        created_at: now_millis(),
        blocks_updated_at: None,
    };
    conn.execute(
        "INSERT INTO documents (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![doc.id.to_hex(), doc.name, doc.description, doc.created_at as i64],
    )?;
    Ok(doc)
}

pub(crate) fn get_document(conn: &Connection, id: DocumentId) -> FolioResult<Option<Document>> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, created_at, blocks_updated_at
             FROM documents WHERE id = ?1",
            params![id.to_hex()],
            document_from_row,
        )
        .optional()?)
}

pub(crate) fn insert_group(
    conn: &Connection,
    document_id: DocumentId,
    name: &str,
    description: Option<&str>,
) -> FolioResult<Group> {
    let group = Group {
        id: GroupId::new(),
        document_id,
        name: truncate_group_name(name),
        description: description.map(str::to_string),
        created_at: now_millis(),
        blocks_updated_at: None,
    };
    conn.execute(
        "INSERT INTO block_groups (id, document_id, name, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            group.id.to_hex(),
            document_id.to_hex(),
            group.name,
            group.description,
            group.created_at as i64,
        ],
    )?;
    Ok(group)
}

pub(crate) fn get_group(conn: &Connection, id: GroupId) -> FolioResult<Option<Group>> {
    Ok(conn
        .query_row(
            "SELECT id, document_id, name, description, created_at, blocks_updated_at
             FROM block_groups WHERE id = ?1",
            params![id.to_hex()],
            group_from_row,
        )
        .optional()?)
}

pub(crate) fn insert_url(
    conn: &Connection,
    document_id: DocumentId,
    url: &str,
    title: Option<&str>,
    description: Option<&str>,
) -> FolioResult<UrlRecord> {
    let record = UrlRecord {
        id: UrlId::new(),
        document_id,
        url: url.trim().to_string(),
        title: title.map(str::to_string),
        description: description.map(str::to_string),
        created_at: now_millis(),
    };
    conn.execute(
        "INSERT INTO urls (id, document_id, url, title, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id.to_hex(),
            document_id.to_hex(),
            record.url,
            record.title,
            record.description,
            record.created_at as i64,
        ],
    )?;
    Ok(record)
}

pub(crate) fn get_url(conn: &Connection, id: UrlId) -> FolioResult<Option<UrlRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, document_id, url, title, description, created_at
             FROM urls WHERE id = ?1",
            params![id.to_hex()],
            url_from_row,
        )
        .optional()?)
}

// =============================================================================
// Blocks
// =============================================================================

pub(crate) fn get_block(conn: &Connection, id: BlockId) -> FolioResult<Option<Block>> {
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_hex()], block_from_row)
        .optional()?)
}

pub(crate) fn insert_block(conn: &Connection, block: &Block) -> FolioResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO blocks ({BLOCK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            block.id.to_hex(),
            block.document_id.to_hex(),
            block.group_id.map(|g| g.to_hex()),
            block.parent_id.map(|p| p.to_hex()),
            block.order_number,
            block.style_type.as_str(),
            block.content_type.map(|c| c.as_str()),
            block.reference.map(|r| r.ref_type.as_str()),
            block.reference.map(|r| r.ref_id.to_hex()),
            block.title,
            block.body,
            block.created_at as i64,
            block.updated_at as i64,
        ],
    )?;
    Ok(())
}

/// Rewrite the content columns of a block. Structural columns are untouched.
pub(crate) fn update_block_content(conn: &Connection, block: &Block) -> FolioResult<()> {
    conn.execute(
        "UPDATE blocks
         SET style_type = ?2, content_type = ?3, ref_type = ?4, ref_id = ?5,
             title = ?6, body = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            block.id.to_hex(),
            block.style_type.as_str(),
            block.content_type.map(|c| c.as_str()),
            block.reference.map(|r| r.ref_type.as_str()),
            block.reference.map(|r| r.ref_id.to_hex()),
            block.title,
            block.body,
            block.updated_at as i64,
        ],
    )?;
    Ok(())
}

/// Delete the blocks matched by `roots` (a `WHERE` clause over `blocks`) and
/// every block below them. Returns the number of rows removed.
///
/// Rows go leaves first, one at a time. Relying on `ON DELETE CASCADE` for
/// the parent chain would nest one trigger per level, and SQLite refuses
/// past its recursion limit.
pub(crate) fn delete_subtrees(
    conn: &Connection,
    roots: &str,
    values: &[Value],
) -> FolioResult<usize> {
    let ids: Vec<String> = {
        let mut stmt = conn.prepare(&format!(
            "WITH RECURSIVE subtree(id, depth) AS (
                 SELECT id, 0 FROM blocks WHERE {roots}
                 UNION
                 SELECT b.id, s.depth + 1 FROM blocks b JOIN subtree s ON b.parent_id = s.id
                 WHERE s.depth < 1000000
             )
             SELECT id, MAX(depth) AS deepest FROM subtree GROUP BY id ORDER BY deepest DESC"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let mut delete = conn.prepare("DELETE FROM blocks WHERE id = ?1")?;
    let mut removed = 0;
    for id in &ids {
        removed += delete.execute(params![id])?;
    }
    Ok(removed)
}

/// Set the structural columns of one block.
pub(crate) fn place_block(
    conn: &Connection,
    id: BlockId,
    group_id: Option<GroupId>,
    parent_id: Option<BlockId>,
    order_number: u32,
    updated_at: u64,
) -> FolioResult<()> {
    conn.execute(
        "UPDATE blocks SET group_id = ?2, parent_id = ?3, order_number = ?4, updated_at = ?5
         WHERE id = ?1",
        params![
            id.to_hex(),
            group_id.map(|g| g.to_hex()),
            parent_id.map(|p| p.to_hex()),
            order_number,
            updated_at as i64,
        ],
    )?;
    Ok(())
}
