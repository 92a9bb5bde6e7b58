//! Position allocation within a sibling set.
//!
//! A sibling set is every block sharing `(document_id, group_id, parent_id)`.
//! Positions are dense `0..n-1` under the compacting gap policy. Both
//! operations accept an exclusion list: blocks currently being relocated are
//! invisible to them, so a move within one set neither counts the movers
//! toward the end slot nor shifts them out of the way.
//!
//! Callers must hold the write lock (see [`crate::Store::write`]); the
//! read-then-shift sequence is only race-free inside that transaction.

use folio_types::{BlockId, Scope};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params_from_iter};

use crate::error::{FolioError, FolioResult};
use crate::store::id_col;

/// Bind values for `document_id = ?1 AND group_id IS ?2 AND parent_id IS ?3`.
fn scope_values(scope: &Scope) -> Vec<Value> {
    vec![
        Value::Text(scope.document_id.to_hex()),
        scope.group_id.map_or(Value::Null, |g| Value::Text(g.to_hex())),
        scope.parent_id.map_or(Value::Null, |p| Value::Text(p.to_hex())),
    ]
}

const SCOPE_FILTER: &str = "document_id = ?1 AND group_id IS ?2 AND parent_id IS ?3";

/// Append `AND id NOT IN (...)` for `excluding`, numbering placeholders after `values`.
fn push_exclusion(sql: &mut String, values: &mut Vec<Value>, excluding: &[BlockId]) {
    if excluding.is_empty() {
        return;
    }
    let start = values.len() + 1;
    let placeholders: Vec<String> = (start..start + excluding.len())
        .map(|i| format!("?{i}"))
        .collect();
    sql.push_str(&format!(" AND id NOT IN ({})", placeholders.join(", ")));
    values.extend(excluding.iter().map(|id| Value::Text(id.to_hex())));
}

fn to_slot(value: i64) -> FolioResult<u32> {
    u32::try_from(value).map_err(|_| FolioError::invalid("order_number", "sibling set is full"))
}

/// Reserve `count` contiguous slots in `scope` and return the first.
///
/// Without `insert_before` the slots follow the current maximum (0 for an
/// empty set). With it, every sibling at or after the anchor shifts up by
/// `count` in one UPDATE and the first slot is the anchor's old position.
pub fn allocate(
    conn: &Connection,
    scope: &Scope,
    insert_before: Option<BlockId>,
    count: u32,
    excluding: &[BlockId],
) -> FolioResult<u32> {
    if count == 0 {
        return Err(FolioError::invalid("count", "must allocate at least one slot"));
    }

    let Some(anchor) = insert_before else {
        let mut values = scope_values(scope);
        let mut sql =
            format!("SELECT COALESCE(MAX(order_number) + 1, 0) FROM blocks WHERE {SCOPE_FILTER}");
        push_exclusion(&mut sql, &mut values, excluding);
        let next: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        // room for the whole run, not just the first slot
        to_slot(next + i64::from(count) - 1)?;
        tracing::debug!(scope = %scope, start = next, count, "allocated at end");
        return to_slot(next);
    };

    if excluding.contains(&anchor) {
        return Err(FolioError::invalid(
            "insert_before",
            format!("{anchor} is one of the blocks being placed"),
        ));
    }

    let mut values = scope_values(scope);
    values.push(Value::Text(anchor.to_hex()));
    let anchor_order: Option<u32> = conn
        .query_row(
            &format!("SELECT order_number FROM blocks WHERE {SCOPE_FILTER} AND id = ?4"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .optional()?;
    let Some(anchor_order) = anchor_order else {
        return Err(FolioError::not_found("insert-before block", anchor));
    };

    let mut values = scope_values(scope);
    values.push(Value::Integer(i64::from(count)));
    values.push(Value::Integer(i64::from(anchor_order)));
    let mut sql = format!(
        "UPDATE blocks SET order_number = order_number + ?4
         WHERE {SCOPE_FILTER} AND order_number >= ?5"
    );
    push_exclusion(&mut sql, &mut values, excluding);
    let shifted = conn.execute(&sql, params_from_iter(values.iter()))?;

    tracing::debug!(scope = %scope, start = anchor_order, count, shifted, "allocated before sibling");
    Ok(anchor_order)
}

/// Renumber the siblings of `scope` (minus `excluding`) to `0..n-1`,
/// keeping their relative order. Returns the number of rows renumbered.
pub fn compact(conn: &Connection, scope: &Scope, excluding: &[BlockId]) -> FolioResult<usize> {
    let mut values = scope_values(scope);
    let mut filter = SCOPE_FILTER.to_string();
    push_exclusion(&mut filter, &mut values, excluding);
    let sql = format!(
        "WITH ranked AS (
             SELECT id, ROW_NUMBER() OVER (ORDER BY order_number, id) - 1 AS rn
             FROM blocks WHERE {filter}
         )
         UPDATE blocks SET order_number = ranked.rn
         FROM ranked
         WHERE blocks.id = ranked.id AND blocks.order_number != ranked.rn"
    );
    let renumbered = conn.execute(&sql, params_from_iter(values.iter()))?;
    if renumbered > 0 {
        tracing::debug!(scope = %scope, renumbered, "compacted sibling set");
    }
    Ok(renumbered)
}

/// Ids and positions of the siblings in `scope`, in order.
pub fn siblings(conn: &Connection, scope: &Scope) -> FolioResult<Vec<(BlockId, u32)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, order_number FROM blocks WHERE {SCOPE_FILTER} ORDER BY order_number, id"
    ))?;
    let rows = stmt.query_map(params_from_iter(scope_values(scope).iter()), |row| {
        Ok((id_col::<BlockId>(row, 0)?, row.get::<_, u32>(1)?))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
