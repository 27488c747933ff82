//! Count table specifications.
//!
//! A [`CountSpec`] describes one count-model table: its dimension columns,
//! the columns rows are squashed over, and how many distinct keys a single
//! squash run may collapse. Every table also carries the fixed `id`, `count`
//! and `is_squashed` columns.

use serde::{Deserialize, Serialize};

use crate::{CountsError, CountsResult};

/// Default cap on distinct squash keys handled by one squash run.
pub const DEFAULT_SQUASH_MAX_DISTINCT: usize = 5000;

/// Name of the scope column used by scoped and daily tables.
pub const SCOPE_COLUMN: &str = "scope";
/// Name of the day column used by daily tables.
pub const DAY_COLUMN: &str = "day";

const RESERVED_COLUMNS: [&str; 3] = ["id", "count", "is_squashed"];

/// Storage type of a dimension column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    /// Calendar day stored as `YYYY-MM-DD` text.
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Date => "date",
        }
    }

    pub(crate) fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text | Self::Date => "TEXT",
        }
    }
}

/// A dimension column of a count table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// What the squasher does when a key's rows sum to a negative total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeNetPolicy {
    /// Store `max(0, total)`. A negative total is logged and discarded.
    #[default]
    Clamp,
    /// Store the total as-is, negative or not.
    Preserve,
}

impl NegativeNetPolicy {
    /// Net value to store for a key whose rows summed to `total`.
    pub fn apply(&self, total: i64) -> i64 {
        match self {
            Self::Clamp => total.max(0),
            Self::Preserve => total,
        }
    }
}

/// Description of one squashable count table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSpec {
    /// SQL table name.
    pub table: String,
    /// Dimension columns, in storage order.
    pub columns: Vec<Column>,
    /// Columns rows are grouped and collapsed over. Also the ordering used
    /// when selecting keys to squash.
    pub squash_over: Vec<String>,
    /// Maximum distinct keys collapsed per squash run.
    #[serde(default = "default_squash_max_distinct")]
    pub squash_max_distinct: usize,
    #[serde(default)]
    pub negative_net_policy: NegativeNetPolicy,
    /// Probability that a recorded delta squashes its own key right away.
    #[serde(default)]
    pub inline_squash_probability: f64,
}

fn default_squash_max_distinct() -> usize {
    DEFAULT_SQUASH_MAX_DISTINCT
}

impl CountSpec {
    /// A table with caller-declared columns and no squash key yet.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            squash_over: Vec::new(),
            squash_max_distinct: DEFAULT_SQUASH_MAX_DISTINCT,
            negative_net_policy: NegativeNetPolicy::Clamp,
            inline_squash_probability: 0.0,
        }
    }

    /// A table counting by `scope`, squashed over `scope`.
    pub fn scoped(table: impl Into<String>) -> Self {
        Self::new(table)
            .column(SCOPE_COLUMN, ColumnType::Text)
            .squash_over([SCOPE_COLUMN])
    }

    /// A table counting by `scope` and `day`, squashed over both.
    pub fn daily(table: impl Into<String>) -> Self {
        Self::new(table)
            .column(SCOPE_COLUMN, ColumnType::Text)
            .column(DAY_COLUMN, ColumnType::Date)
            .squash_over([SCOPE_COLUMN, DAY_COLUMN])
    }

    /// Add a dimension column.
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    /// Replace the squash key.
    pub fn squash_over<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.squash_over = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_squash_max_distinct(mut self, max: usize) -> Self {
        self.squash_max_distinct = max;
        self
    }

    pub fn with_negative_net_policy(mut self, policy: NegativeNetPolicy) -> Self {
        self.negative_net_policy = policy;
        self
    }

    pub fn with_inline_squash_probability(mut self, probability: f64) -> Self {
        self.inline_squash_probability = probability;
        self
    }

    /// Look up a dimension column by name.
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    /// Check the spec can be turned into SQL safely.
    ///
    /// An empty `squash_over` is accepted here; it only becomes an error when
    /// the table is squashed.
    pub fn validate(&self) -> CountsResult<()> {
        check_identifier(&self.table, "table")?;
        if self.table.starts_with("sqlite_") {
            return Err(CountsError::Config(format!(
                "table name {:?} is reserved by SQLite",
                self.table
            )));
        }

        if self.columns.is_empty() {
            return Err(CountsError::Config(format!(
                "{} must declare at least one dimension column",
                self.table
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            check_identifier(&column.name, "column")?;
            if RESERVED_COLUMNS.contains(&column.name.to_ascii_lowercase().as_str()) {
                return Err(CountsError::Config(format!(
                    "{}: column name {:?} is reserved",
                    self.table, column.name
                )));
            }
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(CountsError::Config(format!(
                    "{}: duplicate column {:?}",
                    self.table, column.name
                )));
            }
        }

        for name in &self.squash_over {
            if !self.has_column(name) {
                return Err(CountsError::Config(format!(
                    "{}: squash_over names unknown column {:?}",
                    self.table, name
                )));
            }
        }

        // A squashed row has to carry a value for every dimension column.
        if !self.squash_over.is_empty() {
            if let Some(missing) = self
                .columns
                .iter()
                .find(|c| !self.squash_over.contains(&c.name))
            {
                return Err(CountsError::Config(format!(
                    "{}: squash_over must include column {:?}",
                    self.table, missing.name
                )));
            }
        }

        if self.squash_max_distinct == 0 {
            return Err(CountsError::Config(format!(
                "{}: squash_max_distinct must be at least 1",
                self.table
            )));
        }

        if !(0.0..=1.0).contains(&self.inline_squash_probability) {
            return Err(CountsError::Config(format!(
                "{}: inline_squash_probability must be within 0.0..=1.0",
                self.table
            )));
        }

        Ok(())
    }

    /// Error raised by the squasher when there is no squash key.
    pub(crate) fn require_squash_key(&self) -> CountsResult<()> {
        if self.squash_over.is_empty() {
            return Err(CountsError::Config(format!(
                "{} must define squash_over with at least one column",
                self.table
            )));
        }
        Ok(())
    }

    pub(crate) fn quoted_table(&self) -> String {
        quote(&self.table)
    }
}

/// Quote an already validated identifier.
pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn check_identifier(name: &str, what: &str) -> CountsResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CountsError::Config(format!(
            "invalid {what} name {name:?}: expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}
