//! Squasher: collapses every row of a squash key into one net row.
//!
//! For each key a single `IMMEDIATE` transaction (a savepoint when the caller
//! already holds a transaction) deletes all of the key's
//! rows with `DELETE ... RETURNING "count"` and, when the net is non-zero,
//! inserts one squashed row carrying it. The sum over a key is the same
//! before and after, except that a negative net is clamped to zero under
//! [`NegativeNetPolicy::Clamp`](crate::NegativeNetPolicy::Clamp).
//!
//! Keys commit independently: an error on one key leaves earlier keys
//! squashed and is returned to the caller.

use std::time::Instant;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, warn};

use crate::models::DimValue;
use crate::spec::quote;
use crate::write_tx::WriteTx;
use crate::{CountKey, CountSpec, CountsResult, NegativeNetPolicy};

/// Squash up to `squash_max_distinct` keys that have unsquashed rows.
///
/// Keys are taken in `squash_over` column order. Returns how many keys were
/// squashed; anything past the cap is left for the next call.
pub fn squash(conn: &Connection, spec: &CountSpec) -> CountsResult<usize> {
    spec.require_squash_key()?;

    let start = Instant::now();
    let keys = unsquashed_keys(conn, spec, spec.squash_max_distinct)?;

    for key in &keys {
        squash_key(conn, spec, key)?;
    }

    info!(
        table = %spec.table,
        keys = keys.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Squashed distinct sets"
    );
    Ok(keys.len())
}

/// Squash one key, whether or not it has unsquashed rows.
///
/// Returns the net now stored for the key, or `None` if no row remains.
pub fn squash_key(conn: &Connection, spec: &CountSpec, key: &CountKey) -> CountsResult<Option<i64>> {
    spec.require_squash_key()?;

    let columns: Vec<&str> = spec.squash_over.iter().map(String::as_str).collect();
    let values = key.bind(spec, &columns)?;

    let condition: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect();
    let delete_sql = format!(
        "DELETE FROM {} WHERE {} RETURNING \"count\"",
        spec.quoted_table(),
        condition.join(" AND ")
    );

    let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("?{i}")).collect();
    let insert_sql = format!(
        "INSERT INTO {} ({}, \"count\", is_squashed) VALUES ({}, 1)",
        spec.quoted_table(),
        column_list.join(", "),
        placeholders.join(", ")
    );

    let tx = WriteTx::begin(conn)?;

    let removed: Vec<i64> = {
        let mut stmt = tx.prepare_cached(&delete_sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get(0))?;
        rows.collect::<Result<Vec<i64>, _>>()?
    };

    let total: i64 = removed.iter().sum();
    let net = spec.negative_net_policy.apply(total);

    if net != 0 {
        let mut stmt = tx.prepare_cached(&insert_sql)?;
        let params = values
            .iter()
            .map(|v| *v as &dyn rusqlite::ToSql)
            .chain(std::iter::once(&net as &dyn rusqlite::ToSql));
        stmt.execute(params_from_iter(params))?;
    }

    tx.commit()?;

    if total < 0 && spec.negative_net_policy == NegativeNetPolicy::Clamp {
        warn!(
            table = %spec.table,
            %key,
            total,
            "Negative net clamped to zero while squashing"
        );
    }
    debug!(table = %spec.table, %key, rows = removed.len(), net, "Squashed key");

    Ok((net != 0).then_some(net))
}

/// Distinct squash keys with at least one unsquashed row, at most `limit`.
pub fn unsquashed_keys(conn: &Connection, spec: &CountSpec, limit: usize) -> CountsResult<Vec<CountKey>> {
    spec.require_squash_key()?;

    let column_types = spec
        .squash_over
        .iter()
        .map(|name| {
            spec.find_column(name).map(|c| c.column_type).ok_or_else(|| {
                crate::CountsError::Config(format!(
                    "{}: squash_over names unknown column {:?}",
                    spec.table, name
                ))
            })
        })
        .collect::<CountsResult<Vec<_>>>()?;

    let column_list: Vec<String> = spec.squash_over.iter().map(|c| quote(c)).collect();
    let column_list = column_list.join(", ");
    let sql = format!(
        "SELECT DISTINCT {column_list} FROM {} WHERE is_squashed = 0 ORDER BY {column_list} LIMIT ?1",
        spec.quoted_table()
    );

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare_cached(&sql)?;
    let keys = stmt
        .query_map([limit], |row| {
            let mut key = CountKey::new();
            for (i, (name, column_type)) in spec.squash_over.iter().zip(&column_types).enumerate() {
                key = key.with(name.as_str(), DimValue::read(row, i, *column_type)?);
            }
            Ok(key)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(keys)
}
