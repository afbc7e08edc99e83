use rusqlite::{params_from_iter, Connection};
use std::collections::HashSet;

/// Tables whose rows keep a dense `sort_order` (0..n-1), either over the
/// whole table or within a parent row.
#[derive(Debug, Clone, Copy)]
pub enum Ordered<'a> {
    Units,
    Topics { unit_id: &'a str },
}

impl<'a> Ordered<'a> {
    fn table(&self) -> &'static str {
        match self {
            Ordered::Units => "units",
            Ordered::Topics { .. } => "topics",
        }
    }

    fn scope_sql(&self) -> &'static str {
        match self {
            Ordered::Units => "1 = 1",
            Ordered::Topics { .. } => "unit_id = ?",
        }
    }

    fn scope_params(&self) -> Vec<&'a str> {
        match self {
            Ordered::Units => Vec::new(),
            Ordered::Topics { unit_id } => vec![*unit_id],
        }
    }
}

pub fn ordered_ids(conn: &Connection, scope: Ordered<'_>) -> rusqlite::Result<Vec<String>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} ORDER BY sort_order, rowid",
        scope.table(),
        scope.scope_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(scope.scope_params()), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Opens a gap at `position` (clamped to 0..=n, default n) and returns the
/// slot the new row must take.
pub fn insert_slot(
    conn: &Connection,
    scope: Ordered<'_>,
    position: Option<i64>,
) -> rusqlite::Result<i64> {
    renumber(conn, scope)?;
    let n = ordered_ids(conn, scope)?.len() as i64;
    let pos = position.unwrap_or(n).clamp(0, n);
    let sql = format!(
        "UPDATE {} SET sort_order = sort_order + 1 WHERE {} AND sort_order >= ?",
        scope.table(),
        scope.scope_sql()
    );
    let mut params: Vec<rusqlite::types::Value> = scope
        .scope_params()
        .into_iter()
        .map(|s| rusqlite::types::Value::Text(s.to_string()))
        .collect();
    params.push(rusqlite::types::Value::Integer(pos));
    conn.execute(&sql, params_from_iter(params))?;
    Ok(pos)
}

/// Rewrites `sort_order` as 0..n-1, keeping the current relative order.
pub fn renumber(conn: &Connection, scope: Ordered<'_>) -> rusqlite::Result<()> {
    let ids = ordered_ids(conn, scope)?;
    write_order(conn, scope, &ids)
}

/// Applies a caller-supplied order. `ids` must be exactly the current set
/// of rows in scope, each once.
pub fn apply_order(conn: &Connection, scope: Ordered<'_>, ids: &[String]) -> Result<(), String> {
    let current = ordered_ids(conn, scope).map_err(|e| e.to_string())?;
    let current_set: HashSet<&str> = current.iter().map(|s| s.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ids {
        if !current_set.contains(id.as_str()) {
            return Err(format!("unknown id in order: {}", id));
        }
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate id in order: {}", id));
        }
    }
    if seen.len() != current.len() {
        return Err(format!(
            "order must list all {} rows, got {}",
            current.len(),
            seen.len()
        ));
    }
    write_order(conn, scope, ids).map_err(|e| e.to_string())
}

fn write_order(conn: &Connection, scope: Ordered<'_>, ids: &[String]) -> rusqlite::Result<()> {
    let sql = format!("UPDATE {} SET sort_order = ? WHERE id = ?", scope.table());
    let mut stmt = conn.prepare(&sql)?;
    for (i, id) in ids.iter().enumerate() {
        stmt.execute((i as i64, id))?;
    }
    Ok(())
}
