//! Count keys, filters and stored rows.

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::spec::{ColumnType, CountSpec, DAY_COLUMN, SCOPE_COLUMN};
use crate::{CountsError, CountsResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Value of one dimension column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum DimValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

impl DimValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Text(_) => ColumnType::Text,
            Self::Integer(_) => ColumnType::Integer,
            Self::Date(_) => ColumnType::Date,
        }
    }

    /// Read a value of the given column type out of a result row.
    pub(crate) fn read(
        row: &rusqlite::Row<'_>,
        idx: usize,
        column_type: ColumnType,
    ) -> rusqlite::Result<Self> {
        Ok(match column_type {
            ColumnType::Text => Self::Text(row.get(idx)?),
            ColumnType::Integer => Self::Integer(row.get(idx)?),
            ColumnType::Date => Self::Date(row.get::<_, SqlDate>(idx)?.0),
        })
    }
}

impl fmt::Display for DimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<&str> for DimValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for DimValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for DimValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for DimValue {
    fn from(n: i32) -> Self {
        Self::Integer(n.into())
    }
}

impl From<NaiveDate> for DimValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl ToSql for DimValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Integer(n) => ToSqlOutput::from(*n),
            Self::Date(d) => ToSqlOutput::from(d.format(DATE_FORMAT).to_string()),
        })
    }
}

/// `YYYY-MM-DD` text column decoded as a [`NaiveDate`].
pub(crate) struct SqlDate(pub NaiveDate);

impl FromSql for SqlDate {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(SqlDate)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Values identifying one counter series, by column name.
///
/// When used with [`record`](crate::CountsDatabase::record) the key must name
/// every dimension column of the table; when returned by the squasher it
/// holds the squash-key columns in `squash_over` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountKey {
    values: Vec<(String, DimValue)>,
}

impl CountKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a table whose only dimension is `scope`.
    pub fn scope(scope: impl Into<String>) -> Self {
        Self::new().with(SCOPE_COLUMN, scope.into())
    }

    /// Key with `scope` and `day` set.
    pub fn daily(scope: impl Into<String>, day: NaiveDate) -> Self {
        Self::scope(scope).with(DAY_COLUMN, day)
    }

    /// Set a column, replacing any earlier value for it.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<DimValue>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&DimValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DimValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values for `columns`, in that order, type-checked against `spec`.
    ///
    /// The key must name exactly `columns`.
    pub(crate) fn bind(&self, spec: &CountSpec, columns: &[&str]) -> CountsResult<Vec<&DimValue>> {
        if let Some((extra, _)) = self.values.iter().find(|(name, _)| !columns.contains(&name.as_str())) {
            return Err(CountsError::InvalidData(format!(
                "{}: key column {:?} is not part of {:?}",
                spec.table, extra, columns
            )));
        }

        columns
            .iter()
            .map(|name| {
                let value = self.get(name).ok_or_else(|| {
                    CountsError::InvalidData(format!("{}: key is missing column {:?}", spec.table, name))
                })?;
                check_type(spec, name, value)?;
                Ok(value)
            })
            .collect()
    }
}

impl fmt::Display for CountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

impl Serialize for CountKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

fn check_type(spec: &CountSpec, column: &str, value: &DimValue) -> CountsResult<()> {
    let column_type = spec
        .find_column(column)
        .map(|c| c.column_type)
        .ok_or_else(|| {
            CountsError::InvalidData(format!("{}: unknown column {:?}", spec.table, column))
        })?;
    if column_type != value.column_type() {
        return Err(CountsError::InvalidData(format!(
            "{}: column {:?} expects {} but got {}",
            spec.table,
            column,
            column_type.as_str(),
            value.column_type().as_str()
        )));
    }
    Ok(())
}

/// Row selection for aggregate queries.
///
/// All conditions are ANDed. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountFilter {
    equals: Vec<(String, DimValue)>,
    scopes: Vec<String>,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
}

impl CountFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching every dimension of `key`.
    pub fn from_key(key: &CountKey) -> Self {
        key.iter()
            .fold(Self::new(), |filter, (name, value)| filter.eq(name, value.clone()))
    }

    /// Require `column = value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<DimValue>) -> Self {
        self.equals.push((column.into(), value.into()));
        self
    }

    /// Require `scope = scope`.
    pub fn scope(self, scope: impl Into<String>) -> Self {
        self.eq(SCOPE_COLUMN, scope.into())
    }

    /// Require `scope IN (scopes)`. An empty list leaves scopes unfiltered.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Require `since <= day < until`.
    pub fn period(mut self, since: NaiveDate, until: NaiveDate) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Require `day >= since`.
    pub fn since(mut self, since: NaiveDate) -> Self {
        self.since = Some(since);
        self
    }

    /// Require `day < until`.
    pub fn until(mut self, until: NaiveDate) -> Self {
        self.until = Some(until);
        self
    }

    /// Render as a SQL condition (`1` when empty) plus positional parameters.
    pub(crate) fn to_sql(&self, spec: &CountSpec) -> CountsResult<(String, Vec<DimValue>)> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for (column, value) in &self.equals {
            check_type(spec, column, value)?;
            params.push(value.clone());
            clauses.push(format!("{} = ?{}", crate::spec::quote(column), params.len()));
        }

        if !self.scopes.is_empty() {
            require_column(spec, SCOPE_COLUMN, "a scope filter")?;
            let mut placeholders = Vec::with_capacity(self.scopes.len());
            for scope in &self.scopes {
                params.push(DimValue::Text(scope.clone()));
                placeholders.push(format!("?{}", params.len()));
            }
            clauses.push(format!("\"scope\" IN ({})", placeholders.join(", ")));
        }

        if let Some(since) = self.since {
            require_column(spec, DAY_COLUMN, "a period filter")?;
            params.push(DimValue::Date(since));
            clauses.push(format!("\"day\" >= ?{}", params.len()));
        }

        if let Some(until) = self.until {
            require_column(spec, DAY_COLUMN, "a period filter")?;
            params.push(DimValue::Date(until));
            clauses.push(format!("\"day\" < ?{}", params.len()));
        }

        let sql = if clauses.is_empty() {
            "1".to_string()
        } else {
            clauses.join(" AND ")
        };
        Ok((sql, params))
    }
}

/// Fail unless the table has `column` of the type the operation needs.
pub(crate) fn require_column(spec: &CountSpec, column: &str, operation: &str) -> CountsResult<()> {
    let expected = if column == DAY_COLUMN {
        ColumnType::Date
    } else {
        ColumnType::Text
    };
    match spec.find_column(column) {
        Some(c) if c.column_type == expected => Ok(()),
        _ => Err(CountsError::InvalidData(format!(
            "{}: {} needs a {} column {:?}",
            spec.table,
            operation,
            expected.as_str(),
            column
        ))),
    }
}

/// One stored counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRow {
    pub id: i64,
    pub key: CountKey,
    pub count: i64,
    pub is_squashed: bool,
}
