//! U-Report counts - record, squash and inspect squashable counters.

mod app;
mod args;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ureport_config::{init_logging, Config, Paths};
use ureport_counters::{Contact, PollResult};

use crate::args::{FactChange, FilterArgs, GroupBy, KeyArgs, TableShape};

/// U-Report counts command-line interface.
#[derive(Parser)]
#[command(name = "ureport-counts")]
#[command(about = "Append-only counters with periodic squashing, backed by SQLite")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.ureport
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Database file. Defaults to counts.sqlite under the base directory
    #[arg(long, global = true, env = "UREPORT_DATABASE")]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and register a count table
    Install {
        /// Table layout
        #[arg(value_enum)]
        shape: TableShape,
        /// Table name (required for scoped and daily tables)
        table: Option<String>,
    },
    /// Record one delta
    Record {
        table: String,
        #[command(flatten)]
        key: KeyArgs,
        /// Signed delta to add
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
    /// Squash one table, or every registered table
    Squash { table: Option<String> },
    /// Print the total over matching rows
    Sum {
        table: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print totals grouped by scope, day or month
    Totals {
        table: String,
        #[arg(long, value_enum, default_value = "scope")]
        by: GroupBy,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print JSON instead of one line per group
        #[arg(long)]
        json: bool,
    },
    /// Print stored rows as JSON lines
    Rows {
        table: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Apply a contact change (JSON) to the reporter counters
    Contact {
        #[command(subcommand)]
        change: FactChange,
    },
    /// Apply a poll result change (JSON) to the poll result counters
    PollResult {
        #[command(subcommand)]
        change: FactChange,
    },
    /// List registered tables with their row counts
    Tables,
    /// Delete every row of a table
    Reset { table: String },
    /// Run the squash worker until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    paths.ensure_dirs()?;
    init_logging("ureport-counts", &config, &paths);

    let db_path = cli.database.unwrap_or_else(|| paths.database_file());
    let ctx = app::Context { config, db_path };

    match cli.command {
        Commands::Install { shape, table } => app::install(&ctx, shape, table)?,
        Commands::Record { table, key, delta } => app::record(&ctx, &table, &key, delta)?,
        Commands::Squash { table } => app::squash(&ctx, table.as_deref())?,
        Commands::Sum { table, filter } => app::sum(&ctx, &table, &filter)?,
        Commands::Totals {
            table,
            by,
            filter,
            json,
        } => app::totals(&ctx, &table, by, &filter, json)?,
        Commands::Rows { table, filter } => app::rows(&ctx, &table, &filter)?,
        Commands::Contact { change } => app::apply_change::<Contact>(&ctx, &change)?,
        Commands::PollResult { change } => app::apply_change::<PollResult>(&ctx, &change)?,
        Commands::Tables => app::tables(&ctx)?,
        Commands::Reset { table } => app::reset(&ctx, &table)?,
        Commands::Run => app::run_worker(&ctx).await?,
    }

    Ok(())
}
