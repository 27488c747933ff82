//! Aggregator: read-only queries over count tables.
//!
//! Every query sums `count` over all matching rows, squashed or not, so results
//! are correct at any point between squash runs.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{params_from_iter, Connection};

use crate::models::{require_column, SqlDate};
use crate::spec::{quote, DAY_COLUMN, SCOPE_COLUMN};
use crate::{CountFilter, CounterRow, CountKey, CountSpec, CountsResult, DimValue};

const MONTH_EXPR: &str = "date(\"day\", 'start of month')";

/// Sum of `count` over matching rows. Zero when nothing matches.
pub fn sum(conn: &Connection, spec: &CountSpec, filter: &CountFilter) -> CountsResult<i64> {
    let (condition, params) = filter.to_sql(spec)?;
    let sql = format!(
        "SELECT COALESCE(SUM(\"count\"), 0) FROM {} WHERE {condition}",
        spec.quoted_table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let total = stmt.query_row(params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(total)
}

/// Totals per scope.
pub fn scope_totals(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
) -> CountsResult<BTreeMap<String, i64>> {
    require_column(spec, SCOPE_COLUMN, "scope_totals")?;
    grouped(conn, spec, filter, "\"scope\"", 1, |row| row.get(0))
}

/// Totals per day.
pub fn day_totals(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
) -> CountsResult<BTreeMap<NaiveDate, i64>> {
    require_column(spec, DAY_COLUMN, "day_totals")?;
    grouped(conn, spec, filter, "\"day\"", 1, |row| Ok(row.get::<_, SqlDate>(0)?.0))
}

/// Totals per month, keyed by the first day of the month.
pub fn month_totals(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
) -> CountsResult<BTreeMap<NaiveDate, i64>> {
    require_column(spec, DAY_COLUMN, "month_totals")?;
    grouped(conn, spec, filter, MONTH_EXPR, 1, |row| Ok(row.get::<_, SqlDate>(0)?.0))
}

/// Totals per (day, scope).
pub fn day_scope_totals(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
) -> CountsResult<BTreeMap<(NaiveDate, String), i64>> {
    require_column(spec, DAY_COLUMN, "day_scope_totals")?;
    require_column(spec, SCOPE_COLUMN, "day_scope_totals")?;
    grouped(conn, spec, filter, "\"day\", \"scope\"", 2, |row| {
        Ok((row.get::<_, SqlDate>(0)?.0, row.get(1)?))
    })
}

/// Totals per (month, scope), months keyed by their first day.
pub fn month_scope_totals(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
) -> CountsResult<BTreeMap<(NaiveDate, String), i64>> {
    require_column(spec, DAY_COLUMN, "month_scope_totals")?;
    require_column(spec, SCOPE_COLUMN, "month_scope_totals")?;
    let group = format!("{MONTH_EXPR}, \"scope\"");
    grouped(conn, spec, filter, &group, 2, |row| {
        Ok((row.get::<_, SqlDate>(0)?.0, row.get(1)?))
    })
}

fn grouped<K, F>(
    conn: &Connection,
    spec: &CountSpec,
    filter: &CountFilter,
    group: &str,
    key_width: usize,
    read_key: F,
) -> CountsResult<BTreeMap<K, i64>>
where
    K: Ord,
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<K>,
{
    let (condition, params) = filter.to_sql(spec)?;
    let sql = format!(
        "SELECT {group}, SUM(\"count\") FROM {} WHERE {condition} GROUP BY {group}",
        spec.quoted_table()
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok((read_key(row)?, row.get::<_, i64>(key_width)?))
    })?;

    let mut totals = BTreeMap::new();
    for row in rows {
        let (key, total) = row?;
        totals.insert(key, total);
    }
    Ok(totals)
}

/// Stored rows matching `filter`, in insert order.
pub fn rows(conn: &Connection, spec: &CountSpec, filter: &CountFilter) -> CountsResult<Vec<CounterRow>> {
    let (condition, params) = filter.to_sql(spec)?;
    let columns: Vec<String> = spec.columns.iter().map(|c| quote(&c.name)).collect();
    let sql = format!(
        "SELECT id, {}, \"count\", is_squashed FROM {} WHERE {condition} ORDER BY id",
        columns.join(", "),
        spec.quoted_table()
    );

    let width = spec.columns.len();
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut key = CountKey::new();
            for (i, column) in spec.columns.iter().enumerate() {
                key = key.with(column.name.as_str(), DimValue::read(row, i + 1, column.column_type)?);
            }
            Ok(CounterRow {
                id: row.get(0)?,
                key,
                count: row.get(width + 1)?,
                is_squashed: row.get(width + 2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of stored rows matching `filter`.
pub fn row_count(conn: &Connection, spec: &CountSpec, filter: &CountFilter) -> CountsResult<i64> {
    let (condition, params) = filter.to_sql(spec)?;
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {condition}",
        spec.quoted_table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let count = stmt.query_row(params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(count)
}

/// Number of rows still waiting for a squash.
pub fn unsquashed_count(conn: &Connection, spec: &CountSpec) -> CountsResult<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE is_squashed = 0",
        spec.quoted_table()
    );
    let count = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count)
}

/// Delete every row of the table. Returns the number of rows removed.
pub fn truncate(conn: &Connection, spec: &CountSpec) -> CountsResult<usize> {
    let removed = conn.execute(&format!("DELETE FROM {}", spec.quoted_table()), [])?;
    tracing::info!(table = %spec.table, removed, "Count table truncated");
    Ok(removed)
}
