//! Database migrations and count table installation.
//!
//! The fixed schema (migration tracking and the count table registry) is
//! versioned in the `migrations` table. Count tables themselves are created
//! from their [`CountSpec`] by [`install_count_table`], which records the
//! spec in `count_tables` so other processes can load it back.

use crate::spec::quote;
use crate::{CountSpec, CountsError, CountsResult};
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> CountsResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_count_tables(conn)?;
    }
    if current_version < 2 {
        migrate_v2_count_table_updated_at(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> CountsResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: registry of installed count tables.
fn migrate_v1_count_tables(conn: &Connection) -> CountsResult<()> {
    info!("Applying migration v1: count_tables");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS count_tables (
            table_name TEXT PRIMARY KEY,
            spec TEXT NOT NULL,
            installed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 1, "count_tables")?;
    Ok(())
}

/// V2: track when a registered spec last changed (batch size, policy).
fn migrate_v2_count_table_updated_at(conn: &Connection) -> CountsResult<()> {
    info!("Applying migration v2: count_tables.updated_at");

    conn.execute_batch(
        "
        ALTER TABLE count_tables ADD COLUMN updated_at TEXT;
        UPDATE count_tables SET updated_at = installed_at;
        ",
    )?;

    record_migration(conn, 2, "count_table_updated_at")?;
    Ok(())
}

/// Create the table and squash-key index for `spec` if missing, and register it.
///
/// Re-installing with the same columns only refreshes the stored spec. An
/// existing table whose columns differ is an error.
pub fn install_count_table(conn: &Connection, spec: &CountSpec) -> CountsResult<()> {
    spec.validate()?;

    let table = spec.quoted_table();
    let mut column_defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    column_defs.extend(
        spec.columns
            .iter()
            .map(|c| format!("{} {} NOT NULL", quote(&c.name), c.column_type.sql_type())),
    );
    column_defs.push("\"count\" INTEGER NOT NULL DEFAULT 0".to_string());
    column_defs.push("is_squashed INTEGER NOT NULL DEFAULT 0".to_string());

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
        column_defs.join(",\n    ")
    ))?;

    check_existing_columns(conn, spec)?;

    if !spec.squash_over.is_empty() {
        let index_columns: Vec<String> = spec
            .squash_over
            .iter()
            .map(|c| quote(c))
            .chain(std::iter::once("is_squashed".to_string()))
            .collect();
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table} ({});",
            quote(&format!("idx_{}_squash", spec.table)),
            index_columns.join(", ")
        ))?;
    }

    let spec_json = serde_json::to_string(spec)?;
    conn.execute(
        "INSERT INTO count_tables (table_name, spec, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(table_name) DO UPDATE SET spec = excluded.spec, updated_at = excluded.updated_at",
        params![spec.table, spec_json],
    )?;

    info!(table = %spec.table, squash_over = ?spec.squash_over, "Count table installed");
    Ok(())
}

fn check_existing_columns(conn: &Connection, spec: &CountSpec) -> CountsResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", spec.quoted_table()))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut expected = vec!["id".to_string()];
    expected.extend(spec.columns.iter().map(|c| c.name.clone()));
    expected.push("count".to_string());
    expected.push("is_squashed".to_string());

    if existing != expected {
        return Err(CountsError::Migration(format!(
            "table {} exists with columns {:?}, expected {:?}",
            spec.table, existing, expected
        )));
    }
    Ok(())
}

/// All registered count specs, ordered by table name.
pub fn load_count_specs(conn: &Connection) -> CountsResult<Vec<CountSpec>> {
    let mut stmt = conn.prepare_cached("SELECT spec FROM count_tables ORDER BY table_name")?;
    let raw: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    raw.iter()
        .map(|json| serde_json::from_str(json).map_err(CountsError::from))
        .collect()
}

/// The registered spec for `table`.
pub fn load_count_spec(conn: &Connection, table: &str) -> CountsResult<CountSpec> {
    let result = conn.query_row(
        "SELECT spec FROM count_tables WHERE table_name = ?1",
        params![table],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(CountsError::NotFound(format!(
            "count table {table} is not registered"
        ))),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ColumnType;

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        conn.prepare(&format!("PRAGMA table_info({table})"))
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert!(table_columns(&conn, "count_tables").contains(&"updated_at".to_string()));
    }

    #[test]
    fn install_creates_table_and_index() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let spec = CountSpec::daily("activity_counts").column("org_id", ColumnType::Integer);
        let spec = spec.squash_over(["org_id", "scope", "day"]);
        install_count_table(&conn, &spec).unwrap();

        assert_eq!(
            table_columns(&conn, "activity_counts"),
            vec!["id", "scope", "day", "org_id", "count", "is_squashed"]
        );

        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_activity_counts_squash'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
    }

    #[test]
    fn install_registers_spec() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let spec = CountSpec::scoped("reporters_counts");
        install_count_table(&conn, &spec).unwrap();

        // Reinstall with a new batch size just updates the registry.
        let resized = spec.clone().with_squash_max_distinct(10);
        install_count_table(&conn, &resized).unwrap();

        assert_eq!(load_count_specs(&conn).unwrap(), vec![resized.clone()]);
        assert_eq!(load_count_spec(&conn, "reporters_counts").unwrap(), resized);
        assert!(matches!(
            load_count_spec(&conn, "missing"),
            Err(CountsError::NotFound(_))
        ));
    }

    #[test]
    fn install_rejects_column_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        install_count_table(&conn, &CountSpec::scoped("counts")).unwrap();
        let result = install_count_table(&conn, &CountSpec::daily("counts"));
        assert!(matches!(result, Err(CountsError::Migration(_))));
    }

    #[test]
    fn install_rejects_invalid_spec() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = install_count_table(&conn, &CountSpec::scoped("bad name"));
        assert!(matches!(result, Err(CountsError::Config(_))));
    }
}
