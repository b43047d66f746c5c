use std::fmt;

use tokio_postgres::types::ToSql;

/// A value bound to a `$n` placeholder of a parameterized statement.
///
/// Fixtures only need the column types the scenarios use, so the set is deliberately small and
/// easy to interpret by in-memory doubles of the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    /// Bound as `int4`.
    Int(i32),
    /// Bound as `text`.
    Text(String),
}

impl SqlParam {
    /// Returns the value as a tokio-postgres parameter.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Int(value) => value,
            SqlParam::Text(value) => value,
        }
    }
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Int(value) => write!(f, "{value}"),
            SqlParam::Text(value) => write!(f, "'{value}'"),
        }
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

/// Converts a slice of [`SqlParam`]s into the form tokio-postgres expects.
pub fn to_sql_params(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(SqlParam::as_to_sql).collect()
}
