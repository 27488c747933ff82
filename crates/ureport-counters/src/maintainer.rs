//! Generic counter maintenance over a fact type.
//!
//! A [`CountedFact`] says which counter keys it contributes one to. The
//! [`CounterMaintainer`] turns fact changes into deltas on its count table.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use counts_database::{aggregate, delta, migrations, CountKey, CountSpec};
use rusqlite::Connection;
use tracing::debug;

use crate::{MaintenanceError, MaintenanceResult};

/// A row whose existence is reflected in a count table.
pub trait CountedFact {
    /// Table layout this fact is counted in, with default squash settings.
    fn count_spec() -> CountSpec;

    /// Keys this fact adds one to. Empty when the fact is not counted.
    fn count_keys(&self) -> Vec<CountKey>;
}

/// Deltas turning the counters for `old` into the counters for `new`.
///
/// `None` stands for "no row". Keys present on both sides cancel out, so an
/// update only writes rows for the values that changed.
pub fn changes<F: CountedFact>(old: Option<&F>, new: Option<&F>) -> Vec<(CountKey, i64)> {
    let mut net: BTreeMap<CountKey, i64> = BTreeMap::new();
    for key in old.map(F::count_keys).unwrap_or_default() {
        *net.entry(key).or_default() -= 1;
    }
    for key in new.map(F::count_keys).unwrap_or_default() {
        *net.entry(key).or_default() += 1;
    }
    net.into_iter().filter(|(_, delta)| *delta != 0).collect()
}

/// Keeps one count table in step with changes to facts of type `F`.
#[derive(Debug, Clone)]
pub struct CounterMaintainer<F> {
    spec: CountSpec,
    _fact: PhantomData<fn(&F)>,
}

impl<F: CountedFact> CounterMaintainer<F> {
    /// Maintainer writing to `spec`.
    pub fn with_spec(spec: CountSpec) -> Self {
        Self {
            spec,
            _fact: PhantomData,
        }
    }

    /// Maintainer for the table as registered in the database.
    ///
    /// The registered spec keeps the operator's squash settings; its columns
    /// and squash key must match the fact's layout.
    pub fn attach(conn: &Connection) -> MaintenanceResult<Self> {
        let expected = F::count_spec();
        let registered = migrations::load_count_spec(conn, &expected.table)?;

        if registered.columns != expected.columns {
            return Err(MaintenanceError::SpecMismatch {
                table: expected.table,
                reason: format!(
                    "columns {:?}, expected {:?}",
                    registered.columns, expected.columns
                ),
            });
        }
        if registered.squash_over != expected.squash_over {
            return Err(MaintenanceError::SpecMismatch {
                table: expected.table,
                reason: format!(
                    "squash_over {:?}, expected {:?}",
                    registered.squash_over, expected.squash_over
                ),
            });
        }

        Ok(Self::with_spec(registered))
    }

    pub fn spec(&self) -> &CountSpec {
        &self.spec
    }

    /// Create and register the count table.
    pub fn install(&self, conn: &Connection) -> MaintenanceResult<()> {
        migrations::install_count_table(conn, &self.spec)?;
        Ok(())
    }

    /// A fact was inserted. Returns the number of deltas written.
    pub fn on_insert(&self, conn: &Connection, new: &F) -> MaintenanceResult<usize> {
        self.apply(conn, changes(None, Some(new)), "insert")
    }

    /// A fact changed from `old` to `new`.
    pub fn on_update(&self, conn: &Connection, old: &F, new: &F) -> MaintenanceResult<usize> {
        self.apply(conn, changes(Some(old), Some(new)), "update")
    }

    /// A fact was deleted.
    pub fn on_delete(&self, conn: &Connection, old: &F) -> MaintenanceResult<usize> {
        self.apply(conn, changes(Some(old), None), "delete")
    }

    /// The fact table was emptied: clear every counter.
    pub fn on_truncate(&self, conn: &Connection) -> MaintenanceResult<usize> {
        Ok(aggregate::truncate(conn, &self.spec)?)
    }

    fn apply(
        &self,
        conn: &Connection,
        entries: Vec<(CountKey, i64)>,
        change: &'static str,
    ) -> MaintenanceResult<usize> {
        delta::record_many(conn, &self.spec, &entries)?;
        debug!(table = %self.spec.table, change, deltas = entries.len(), "Counters adjusted");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use counts_database::ColumnType;

    struct Tagged(Vec<&'static str>);

    impl CountedFact for Tagged {
        fn count_spec() -> CountSpec {
            CountSpec::scoped("tag_counts")
        }

        fn count_keys(&self) -> Vec<CountKey> {
            self.0.iter().map(|tag| CountKey::scope(*tag)).collect()
        }
    }

    #[test]
    fn unchanged_keys_cancel() {
        let old = Tagged(vec!["total", "gender:f"]);
        let new = Tagged(vec!["total", "gender:m"]);

        let deltas = changes(Some(&old), Some(&new));
        assert_eq!(
            deltas,
            vec![(CountKey::scope("gender:f"), -1), (CountKey::scope("gender:m"), 1)]
        );
    }

    #[test]
    fn insert_and_delete_are_mirror_images() {
        let fact = Tagged(vec!["a", "b"]);
        let inserted = changes(None, Some(&fact));
        let deleted = changes(Some(&fact), None);

        assert_eq!(inserted.len(), 2);
        assert!(inserted
            .iter()
            .zip(&deleted)
            .all(|((k1, d1), (k2, d2))| k1 == k2 && *d1 == -*d2));
    }

    #[test]
    fn attach_rejects_foreign_layout() {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();

        let other = CountSpec::scoped("tag_counts")
            .column("org_id", ColumnType::Integer)
            .squash_over(["org_id", "scope"]);
        migrations::install_count_table(&conn, &other).unwrap();

        let result = CounterMaintainer::<Tagged>::attach(&conn);
        assert!(matches!(result, Err(MaintenanceError::SpecMismatch { .. })));
    }

    #[test]
    fn attach_keeps_registered_settings() {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();
        let spec = Tagged::count_spec().with_squash_max_distinct(10);
        migrations::install_count_table(&conn, &spec).unwrap();

        let maintainer = CounterMaintainer::<Tagged>::attach(&conn).unwrap();
        assert_eq!(maintainer.spec().squash_max_distinct, 10);
    }
}
