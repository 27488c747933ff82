//! Delta writer: appends count rows, never updates them.
//!
//! Every write is a plain `INSERT` of an unsquashed row, so concurrent
//! writers never wait on each other for a hot key.

use rand::Rng;
use rusqlite::{params_from_iter, Connection};
use tracing::{trace, warn};

use crate::spec::quote;
use crate::write_tx::WriteTx;
use crate::{squash, CountKey, CountSpec, CountsResult};

/// Record one delta for `key`.
///
/// Works inside a caller's transaction too; the delta then commits with it.
/// If the table has an inline squash probability, the key may be squashed
/// straight after the insert. That squash never fails the call: once the
/// delta is stored, `Ok` is returned.
pub fn record(conn: &Connection, spec: &CountSpec, key: &CountKey, delta: i64) -> CountsResult<()> {
    insert_delta(conn, spec, key, delta)?;
    maybe_squash(conn, spec, key);
    Ok(())
}

/// Record several deltas atomically.
///
/// Either every delta is stored or none is. Inside a caller's transaction the
/// deltas join it through a savepoint.
pub fn record_many(conn: &Connection, spec: &CountSpec, entries: &[(CountKey, i64)]) -> CountsResult<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let tx = WriteTx::begin(conn)?;
    for (key, delta) in entries {
        insert_delta(&tx, spec, key, *delta)?;
    }
    tx.commit()?;

    for (key, _) in entries {
        maybe_squash(conn, spec, key);
    }
    Ok(())
}

fn insert_delta(conn: &Connection, spec: &CountSpec, key: &CountKey, delta: i64) -> CountsResult<()> {
    let columns: Vec<&str> = spec.columns.iter().map(|c| c.name.as_str()).collect();
    let values = key.bind(spec, &columns)?;

    let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}, \"count\", is_squashed) VALUES ({}, 0)",
        spec.quoted_table(),
        column_list.join(", "),
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let params = values
        .into_iter()
        .map(|v| v as &dyn rusqlite::ToSql)
        .chain(std::iter::once(&delta as &dyn rusqlite::ToSql));
    stmt.execute(params_from_iter(params))?;

    trace!(table = %spec.table, %key, delta, "Delta recorded");
    Ok(())
}

/// Best-effort inline squash of a key whose delta is already stored.
fn maybe_squash(conn: &Connection, spec: &CountSpec, key: &CountKey) {
    let p = spec.inline_squash_probability;
    if p > 0.0 && !spec.squash_over.is_empty() && rand::thread_rng().gen_bool(p) {
        if let Err(e) = squash::squash_key(conn, spec, key) {
            warn!(table = %spec.table, %key, error = %e, "Inline squash failed, left for the squash worker");
        }
    }
}
