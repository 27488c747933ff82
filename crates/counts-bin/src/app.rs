//! Command implementations.

use std::path::PathBuf;
use std::time::Duration;

use counts_database::{
    AsyncCountsDatabase, CountSpec, CountsDatabase, CountsError, NegativeNetPolicy,
};
use serde::de::DeserializeOwned;
use squash_worker::{SquashWorker, SquashWorkerConfig};
use tracing::info;
use ureport_config::Config;
use ureport_counters::{Contact, CountedFact, CounterMaintainer, PollResult};

use crate::args::{FactChange, FilterArgs, GroupBy, KeyArgs, TableShape};

type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct Context {
    pub config: Config,
    pub db_path: PathBuf,
}

impl Context {
    fn open(&self) -> Result<CountsDatabase, CountsError> {
        CountsDatabase::open(&self.db_path)
    }
}

/// Layout for `shape` with the configured squash settings applied.
fn table_spec(config: &Config, shape: TableShape, table: Option<String>) -> CommandResult<CountSpec> {
    let spec = match (shape, table) {
        (TableShape::Scoped, Some(table)) => CountSpec::scoped(table),
        (TableShape::Daily, Some(table)) => CountSpec::daily(table),
        (TableShape::Scoped | TableShape::Daily, None) => {
            return Err("a table name is required for scoped and daily tables".into())
        }
        (TableShape::Reporters, _) => Contact::count_spec(),
        (TableShape::PollResults, _) => PollResult::count_spec(),
    };

    let policy = match config.negative_net_policy.as_str() {
        "preserve" => NegativeNetPolicy::Preserve,
        _ => NegativeNetPolicy::Clamp,
    };

    Ok(spec
        .with_squash_max_distinct(config.squash_max_distinct)
        .with_negative_net_policy(policy)
        .with_inline_squash_probability(config.inline_squash_probability))
}

pub fn install(ctx: &Context, shape: TableShape, table: Option<String>) -> CommandResult {
    let spec = table_spec(&ctx.config, shape, table)?;
    ctx.open()?.install(&spec)?;
    println!("installed {}", spec.table);
    Ok(())
}

pub fn record(ctx: &Context, table: &str, key: &KeyArgs, delta: i64) -> CommandResult {
    let db = ctx.open()?;
    let spec = db.count_spec(table)?;
    db.record(&spec, &key.to_key(&spec)?, delta)?;
    Ok(())
}

pub fn squash(ctx: &Context, table: Option<&str>) -> CommandResult {
    let db = ctx.open()?;
    let squashed = match table {
        Some(table) => {
            let spec = db.count_spec(table)?;
            vec![(spec.table.clone(), db.squash(&spec)?)]
        }
        None => db.squash_all()?,
    };
    for (table, keys) in squashed {
        println!("{table}\t{keys}");
    }
    Ok(())
}

pub fn sum(ctx: &Context, table: &str, filter: &FilterArgs) -> CommandResult {
    let db = ctx.open()?;
    let spec = db.count_spec(table)?;
    println!("{}", db.sum(&spec, &filter.to_filter(&spec)?)?);
    Ok(())
}

pub fn totals(
    ctx: &Context,
    table: &str,
    by: GroupBy,
    filter: &FilterArgs,
    json: bool,
) -> CommandResult {
    let db = ctx.open()?;
    let spec = db.count_spec(table)?;
    let filter = filter.to_filter(&spec)?;

    let lines: Vec<(String, i64)> = match by {
        GroupBy::Scope => db.scope_totals(&spec, &filter)?.into_iter().collect(),
        GroupBy::Day => db
            .day_totals(&spec, &filter)?
            .into_iter()
            .map(|(day, total)| (day.to_string(), total))
            .collect(),
        GroupBy::Month => db
            .month_totals(&spec, &filter)?
            .into_iter()
            .map(|(month, total)| (month.format("%Y-%m").to_string(), total))
            .collect(),
        GroupBy::DayScope => db
            .day_scope_totals(&spec, &filter)?
            .into_iter()
            .map(|((day, scope), total)| (format!("{day}\t{scope}"), total))
            .collect(),
        GroupBy::MonthScope => db
            .month_scope_totals(&spec, &filter)?
            .into_iter()
            .map(|((month, scope), total)| (format!("{}\t{scope}", month.format("%Y-%m")), total))
            .collect(),
    };

    if json {
        let map: serde_json::Map<String, serde_json::Value> = lines
            .into_iter()
            .map(|(group, total)| (group.replace('\t', "/"), total.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (group, total) in lines {
            println!("{group}\t{total}");
        }
    }
    Ok(())
}

pub fn rows(ctx: &Context, table: &str, filter: &FilterArgs) -> CommandResult {
    let db = ctx.open()?;
    let spec = db.count_spec(table)?;
    for row in db.rows(&spec, &filter.to_filter(&spec)?)? {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

/// Adjust the counters of `F` for one fact change.
///
/// The table must already be installed; its registered squash settings apply.
pub fn apply_change<F>(ctx: &Context, change: &FactChange) -> CommandResult
where
    F: CountedFact + DeserializeOwned,
{
    let db = ctx.open()?;
    let counters = CounterMaintainer::<F>::attach(db.connection())?;
    let conn = db.connection();

    let written = match change {
        FactChange::Insert { new } => counters.on_insert(conn, &serde_json::from_str(new)?)?,
        FactChange::Update { old, new } => counters.on_update(
            conn,
            &serde_json::from_str(old)?,
            &serde_json::from_str(new)?,
        )?,
        FactChange::Delete { old } => counters.on_delete(conn, &serde_json::from_str(old)?)?,
        FactChange::Truncate => counters.on_truncate(conn)?,
    };
    println!("{}\t{written}", counters.spec().table);
    Ok(())
}

pub fn tables(ctx: &Context) -> CommandResult {
    let db = ctx.open()?;
    for spec in db.count_specs()? {
        let rows = db.row_count(&spec, &Default::default())?;
        let unsquashed = db.unsquashed_count(&spec)?;
        println!(
            "{}\tsquash_over={}\trows={rows}\tunsquashed={unsquashed}",
            spec.table,
            spec.squash_over.join(",")
        );
    }
    Ok(())
}

pub fn reset(ctx: &Context, table: &str) -> CommandResult {
    let db = ctx.open()?;
    let spec = db.count_spec(table)?;
    let removed = db.truncate(&spec)?;
    println!("removed {removed} rows from {table}");
    Ok(())
}

pub async fn run_worker(ctx: &Context) -> CommandResult {
    let db = AsyncCountsDatabase::open(&ctx.db_path).await?;
    let config = SquashWorkerConfig::default()
        .with_interval(Duration::from_secs(ctx.config.squash_interval_secs));

    let worker = SquashWorker::new(config, db.clone());
    let handle = worker.start()?;
    info!(path = %db.path(), "Squash worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down squash worker");

    handle.shutdown().await;
    db.close().await?;
    Ok(())
}
