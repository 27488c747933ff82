//! Shared argument groups and their conversion into engine types.

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use counts_database::{ColumnType, CountFilter, CountKey, CountSpec, CountsError, DimValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TableShape {
    /// `scope` column only
    Scoped,
    /// `scope` and `day` columns
    Daily,
    /// Reporter counters maintained from contacts
    Reporters,
    /// Poll result counters maintained from poll results
    PollResults,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GroupBy {
    Scope,
    Day,
    Month,
    DayScope,
    MonthScope,
}

/// A change to a counted fact, each side given as JSON.
#[derive(Subcommand, Debug)]
pub enum FactChange {
    /// The fact was created
    Insert { new: String },
    /// The fact changed from OLD to NEW
    Update { old: String, new: String },
    /// The fact was deleted
    Delete { old: String },
    /// Every fact was deleted
    Truncate,
}

/// Dimension values naming one counter.
#[derive(Args, Debug, Default)]
pub struct KeyArgs {
    /// Value of the `scope` column
    #[arg(long)]
    pub scope: Option<String>,
    /// Value of the `day` column (YYYY-MM-DD)
    #[arg(long)]
    pub day: Option<NaiveDate>,
    /// Any other column, as COLUMN=VALUE
    #[arg(long = "dim", value_parser = parse_assignment)]
    pub dims: Vec<(String, String)>,
}

impl KeyArgs {
    pub fn to_key(&self, spec: &CountSpec) -> Result<CountKey, CountsError> {
        let mut key = CountKey::new();
        if let Some(scope) = &self.scope {
            key = key.with("scope", scope.as_str());
        }
        if let Some(day) = self.day {
            key = key.with("day", day);
        }
        for (column, value) in &self.dims {
            key = key.with(column.as_str(), dim_value(spec, column, value)?);
        }
        Ok(key)
    }
}

/// Row selection shared by the read commands.
#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Only these scopes (repeatable)
    #[arg(long = "scope")]
    pub scopes: Vec<String>,
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,
    /// First day excluded (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,
    /// Equality on any column, as COLUMN=VALUE (repeatable)
    #[arg(long = "eq", value_parser = parse_assignment)]
    pub equals: Vec<(String, String)>,
}

impl FilterArgs {
    pub fn to_filter(&self, spec: &CountSpec) -> Result<CountFilter, CountsError> {
        let mut filter = CountFilter::new().scopes(self.scopes.iter().cloned());
        if let Some(since) = self.since {
            filter = filter.since(since);
        }
        if let Some(until) = self.until {
            filter = filter.until(until);
        }
        for (column, value) in &self.equals {
            filter = filter.eq(column.as_str(), dim_value(spec, column, value)?);
        }
        Ok(filter)
    }
}

/// Parse `COLUMN=VALUE`.
fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((column, value)) if !column.is_empty() => Ok((column.to_string(), value.to_string())),
        _ => Err(format!("expected COLUMN=VALUE, got {raw:?}")),
    }
}

/// Convert a command-line string to the column's value type.
fn dim_value(spec: &CountSpec, column: &str, raw: &str) -> Result<DimValue, CountsError> {
    let column_type = spec
        .find_column(column)
        .map(|c| c.column_type)
        .ok_or_else(|| CountsError::InvalidData(format!("{}: unknown column {column:?}", spec.table)))?;

    match column_type {
        ColumnType::Text => Ok(DimValue::Text(raw.to_string())),
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(DimValue::Integer)
            .map_err(|_| CountsError::InvalidData(format!("{column}: {raw:?} is not an integer"))),
        ColumnType::Date => raw
            .parse::<NaiveDate>()
            .map(DimValue::Date)
            .map_err(|_| CountsError::InvalidData(format!("{column}: {raw:?} is not a YYYY-MM-DD date"))),
    }
}
