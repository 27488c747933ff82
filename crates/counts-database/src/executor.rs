//! Async count database using a dedicated background thread.
//!
//! Every operation is sent to one SQLite thread and executed in FIFO order,
//! so async callers (the squash worker, the CLI's `run` command) never block
//! the Tokio runtime.
//!
//! Only SQL should run inside [`AsyncCountsDatabase::call`]; the engine
//! functions in [`delta`](crate::delta), [`squash`](crate::squash) and
//! [`aggregate`](crate::aggregate) are all safe to call there.
//!
//! ```ignore
//! let db = AsyncCountsDatabase::open(path).await?;
//! let spec = db.count_spec("reporters_counts").await?;
//! db.record(spec.clone(), CountKey::scope("gender:f"), 1).await?;
//! let squashed = db.squash(spec).await?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::{
    aggregate, db, delta, migrations, squash, CountFilter, CountKey, CountSpec, CountsError,
    CountsResult,
};

/// Convert a tokio_rusqlite::Error to CountsError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> CountsError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => CountsError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => CountsError::Connection("Connection closed".to_string()),
        other => CountsError::Connection(other.to_string()),
    }
}

/// Async count database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncCountsDatabase {
    conn: Connection,
    path: String,
}

impl AsyncCountsDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file and parent directory if needed, enables WAL and
    /// runs pending migrations before returning.
    pub async fn open(path: &Path) -> CountsResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening async counts database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| CountsError::Connection(e.to_string()))?;

        let database = Self {
            conn,
            path: path_str,
        };
        database.call(|conn| db::configure(conn)).await?;

        info!(path = %database.path, "Async counts database initialized with WAL mode");
        Ok(database)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's task is
    /// parked, not blocked, until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> CountsResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> CountsResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our result rides inside tokio_rusqlite's Ok so CountsError survives.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> CountsResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn install(&self, spec: CountSpec) -> CountsResult<()> {
        self.call(move |conn| migrations::install_count_table(conn, &spec))
            .await
    }

    pub async fn count_specs(&self) -> CountsResult<Vec<CountSpec>> {
        self.call(migrations::load_count_specs).await
    }

    pub async fn count_spec(&self, table: &str) -> CountsResult<CountSpec> {
        let table = table.to_string();
        self.call(move |conn| migrations::load_count_spec(conn, &table))
            .await
    }

    pub async fn record(&self, spec: CountSpec, key: CountKey, delta: i64) -> CountsResult<()> {
        self.call(move |conn| delta::record(conn, &spec, &key, delta))
            .await
    }

    pub async fn record_many(
        &self,
        spec: CountSpec,
        entries: Vec<(CountKey, i64)>,
    ) -> CountsResult<()> {
        self.call(move |conn| delta::record_many(conn, &spec, &entries))
            .await
    }

    pub async fn squash(&self, spec: CountSpec) -> CountsResult<usize> {
        self.call(move |conn| squash::squash(conn, &spec)).await
    }

    pub async fn sum(&self, spec: CountSpec, filter: CountFilter) -> CountsResult<i64> {
        self.call(move |conn| aggregate::sum(conn, &spec, &filter))
            .await
    }

    pub async fn scope_totals(
        &self,
        spec: CountSpec,
        filter: CountFilter,
    ) -> CountsResult<BTreeMap<String, i64>> {
        self.call(move |conn| aggregate::scope_totals(conn, &spec, &filter))
            .await
    }

    pub async fn unsquashed_count(&self, spec: CountSpec) -> CountsResult<i64> {
        self.call(move |conn| aggregate::unsquashed_count(conn, &spec))
            .await
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> CountsResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1"))
            .await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection after pending operations finish.
    pub async fn close(self) -> CountsResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| CountsError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Counts database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn async_database_open() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.sqlite");

        let db = AsyncCountsDatabase::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());
        assert!(db.count_specs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn async_record_squash_sum() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_query.sqlite");

        let db = AsyncCountsDatabase::open(&db_path).await.unwrap();
        let spec = CountSpec::scoped("reporters_counts");
        db.install(spec.clone()).await.unwrap();

        db.record(spec.clone(), CountKey::scope("gender:f"), 1).await.unwrap();
        db.record(spec.clone(), CountKey::scope("gender:f"), 1).await.unwrap();
        db.record(spec.clone(), CountKey::scope("gender:f"), -1).await.unwrap();

        assert_eq!(db.squash(spec.clone()).await.unwrap(), 1);
        assert_eq!(db.unsquashed_count(spec.clone()).await.unwrap(), 0);
        assert_eq!(
            db.sum(spec, CountFilter::new().scope("gender:f")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_records() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_concurrent.sqlite");

        let db = AsyncCountsDatabase::open(&db_path).await.unwrap();
        let spec = CountSpec::scoped("reporters_counts");
        db.install(spec.clone()).await.unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                db.record(spec, CountKey::scope("total-reporters"), 1).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let totals = db
            .scope_totals(spec.clone(), CountFilter::new())
            .await
            .unwrap();
        assert_eq!(totals.get("total-reporters"), Some(&10));
        assert_eq!(db.unsquashed_count(spec).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn errors_pass_through_call() {
        let dir = tempdir().unwrap();
        let db = AsyncCountsDatabase::open(&dir.path().join("err.sqlite"))
            .await
            .unwrap();

        let result = db.count_spec("missing").await;
        assert!(matches!(result, Err(CountsError::NotFound(_))));
    }
}
