//! Write scope shared by the delta writer and the squasher.
//!
//! On a connection in autocommit mode a scope is a `BEGIN IMMEDIATE`
//! transaction, so a squash holds the write lock from its first read. Inside
//! a caller's transaction it is a savepoint instead: counter writes then
//! commit or roll back together with the caller's own changes.

use rusqlite::Connection;
use tracing::warn;

use crate::CountsResult;

const SAVEPOINT: &str = "counts_write";

/// An open write scope. Rolled back on drop unless committed.
pub(crate) struct WriteTx<'conn> {
    conn: &'conn Connection,
    nested: bool,
    finished: bool,
}

impl<'conn> WriteTx<'conn> {
    pub(crate) fn begin(conn: &'conn Connection) -> CountsResult<Self> {
        let nested = !conn.is_autocommit();
        if nested {
            conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
        } else {
            conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        Ok(Self {
            conn,
            nested,
            finished: false,
        })
    }

    pub(crate) fn commit(mut self) -> CountsResult<()> {
        self.finished = true;
        if self.nested {
            self.conn.execute_batch(&format!("RELEASE {SAVEPOINT}"))?;
        } else {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> rusqlite::Result<()> {
        self.finished = true;
        if self.nested {
            // ROLLBACK TO leaves the savepoint open; RELEASE pops it.
            self.conn
                .execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"))
        } else {
            self.conn.execute_batch("ROLLBACK")
        }
    }
}

impl std::ops::Deref for WriteTx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.rollback() {
                warn!(error = %e, nested = self.nested, "Failed to roll back counts write");
            }
        }
    }
}
