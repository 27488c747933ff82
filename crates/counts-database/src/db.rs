//! Synchronous count database over a single connection.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::{
    aggregate, delta, migrations, squash, CountFilter, CountKey, CountSpec, CounterRow,
    CountsResult,
};

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -64000;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

/// Open and configure a connection, then run migrations.
pub(crate) fn open_connection(path: &Path) -> CountsResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

pub(crate) fn configure(conn: &Connection) -> CountsResult<()> {
    conn.execute_batch(PRAGMAS)?;
    migrations::run_migrations(conn)?;
    Ok(())
}

/// Count database wrapper with the engine's operations.
///
/// Each `CountsDatabase` owns one connection. Open one per thread to write
/// from several threads; inserts never contend on a counter row.
pub struct CountsDatabase {
    conn: Connection,
}

impl CountsDatabase {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> CountsResult<Self> {
        Ok(Self {
            conn: open_connection(path)?,
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> CountsResult<Self> {
        let conn = Connection::open_in_memory()?;
        // WAL doesn't apply in memory
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ==========================================
    // Count tables
    // ==========================================

    /// Create and register the table for `spec`.
    pub fn install(&self, spec: &CountSpec) -> CountsResult<()> {
        migrations::install_count_table(&self.conn, spec)
    }

    pub fn count_specs(&self) -> CountsResult<Vec<CountSpec>> {
        migrations::load_count_specs(&self.conn)
    }

    pub fn count_spec(&self, table: &str) -> CountsResult<CountSpec> {
        migrations::load_count_spec(&self.conn, table)
    }

    // ==========================================
    // Writes
    // ==========================================

    pub fn record(&self, spec: &CountSpec, key: &CountKey, delta: i64) -> CountsResult<()> {
        delta::record(&self.conn, spec, key, delta)
    }

    /// Record a delta on a table whose only dimension is `scope`.
    pub fn record_scope(&self, spec: &CountSpec, scope: &str, delta: i64) -> CountsResult<()> {
        delta::record(&self.conn, spec, &CountKey::scope(scope), delta)
    }

    pub fn record_many(&self, spec: &CountSpec, entries: &[(CountKey, i64)]) -> CountsResult<()> {
        delta::record_many(&self.conn, spec, entries)
    }

    pub fn squash(&self, spec: &CountSpec) -> CountsResult<usize> {
        squash::squash(&self.conn, spec)
    }

    pub fn squash_key(&self, spec: &CountSpec, key: &CountKey) -> CountsResult<Option<i64>> {
        squash::squash_key(&self.conn, spec, key)
    }

    /// Squash every registered table once. Returns keys squashed per table.
    pub fn squash_all(&self) -> CountsResult<Vec<(String, usize)>> {
        self.count_specs()?
            .into_iter()
            .map(|spec| Ok((spec.table.clone(), self.squash(&spec)?)))
            .collect()
    }

    pub fn truncate(&self, spec: &CountSpec) -> CountsResult<usize> {
        aggregate::truncate(&self.conn, spec)
    }

    // ==========================================
    // Reads
    // ==========================================

    pub fn sum(&self, spec: &CountSpec, filter: &CountFilter) -> CountsResult<i64> {
        aggregate::sum(&self.conn, spec, filter)
    }

    pub fn scope_totals(
        &self,
        spec: &CountSpec,
        filter: &CountFilter,
    ) -> CountsResult<BTreeMap<String, i64>> {
        aggregate::scope_totals(&self.conn, spec, filter)
    }

    pub fn day_totals(
        &self,
        spec: &CountSpec,
        filter: &CountFilter,
    ) -> CountsResult<BTreeMap<NaiveDate, i64>> {
        aggregate::day_totals(&self.conn, spec, filter)
    }

    pub fn month_totals(
        &self,
        spec: &CountSpec,
        filter: &CountFilter,
    ) -> CountsResult<BTreeMap<NaiveDate, i64>> {
        aggregate::month_totals(&self.conn, spec, filter)
    }

    pub fn day_scope_totals(
        &self,
        spec: &CountSpec,
        filter: &CountFilter,
    ) -> CountsResult<BTreeMap<(NaiveDate, String), i64>> {
        aggregate::day_scope_totals(&self.conn, spec, filter)
    }

    pub fn month_scope_totals(
        &self,
        spec: &CountSpec,
        filter: &CountFilter,
    ) -> CountsResult<BTreeMap<(NaiveDate, String), i64>> {
        aggregate::month_scope_totals(&self.conn, spec, filter)
    }

    pub fn rows(&self, spec: &CountSpec, filter: &CountFilter) -> CountsResult<Vec<CounterRow>> {
        aggregate::rows(&self.conn, spec, filter)
    }

    pub fn row_count(&self, spec: &CountSpec, filter: &CountFilter) -> CountsResult<i64> {
        aggregate::row_count(&self.conn, spec, filter)
    }

    pub fn unsquashed_count(&self, spec: &CountSpec) -> CountsResult<i64> {
        aggregate::unsquashed_count(&self.conn, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnType, CountsError};
    use tempfile::tempdir;

    fn create_test_db() -> (CountsDatabase, CountSpec) {
        let db = CountsDatabase::open_in_memory().unwrap();
        let spec = CountSpec::scoped("reporters_counts");
        db.install(&spec).unwrap();
        (db, spec)
    }

    #[test]
    fn record_scope_and_sum() {
        let (db, spec) = create_test_db();

        db.record_scope(&spec, "gender:f", 1).unwrap();
        db.record_scope(&spec, "gender:f", 1).unwrap();
        db.record_scope(&spec, "gender:m", 1).unwrap();

        assert_eq!(db.sum(&spec, &CountFilter::new().scope("gender:f")).unwrap(), 2);
        assert_eq!(db.sum(&spec, &CountFilter::new()).unwrap(), 3);
        assert_eq!(db.unsquashed_count(&spec).unwrap(), 3);
    }

    #[test]
    fn squash_all_uses_registry() {
        let db = CountsDatabase::open_in_memory().unwrap();
        let scoped = CountSpec::scoped("reporters_counts");
        let daily = CountSpec::daily("activity_counts");
        db.install(&scoped).unwrap();
        db.install(&daily).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        db.record_scope(&scoped, "total", 1).unwrap();
        db.record_scope(&scoped, "total", 1).unwrap();
        db.record(&daily, &CountKey::daily("total", day), 4).unwrap();

        let squashed = db.squash_all().unwrap();
        assert_eq!(
            squashed,
            vec![
                ("activity_counts".to_string(), 1),
                ("reporters_counts".to_string(), 1)
            ]
        );
        assert_eq!(db.unsquashed_count(&scoped).unwrap(), 0);
        assert_eq!(db.sum(&scoped, &CountFilter::new()).unwrap(), 2);
    }

    #[test]
    fn squash_all_stops_on_table_without_squash_key() {
        let db = CountsDatabase::open_in_memory().unwrap();
        let spec = CountSpec::new("loose_counts").column("scope", ColumnType::Text);
        db.install(&spec).unwrap();

        assert!(matches!(db.squash_all(), Err(CountsError::Config(_))));
    }

    #[test]
    fn open_file_database_uses_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("counts.sqlite");

        let db = CountsDatabase::open(&path).unwrap();
        let mode: String = db
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let spec = CountSpec::scoped("reporters_counts");
        db.install(&spec).unwrap();
        db.record_scope(&spec, "total", 3).unwrap();
        drop(db);

        // Reopen sees data and registry.
        let db = CountsDatabase::open(&path).unwrap();
        let spec = db.count_spec("reporters_counts").unwrap();
        assert_eq!(db.sum(&spec, &CountFilter::new()).unwrap(), 3);
    }

    #[test]
    fn truncate_clears_rows() {
        let (db, spec) = create_test_db();
        db.record_scope(&spec, "total", 1).unwrap();
        db.squash(&spec).unwrap();
        db.record_scope(&spec, "total", 1).unwrap();

        assert_eq!(db.truncate(&spec).unwrap(), 2);
        assert_eq!(db.sum(&spec, &CountFilter::new()).unwrap(), 0);
    }
}
