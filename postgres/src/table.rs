use std::fmt;

use pg_escape::quote_identifier;

/// Name of the auto-incrementing key column added to keyed tables.
pub const KEY_COLUMN_NAME: &str = "id";

/// Whether a table has a primary key, which decides whether its change messages carry a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// The table has an auto-incrementing `id SERIAL PRIMARY KEY` column.
    Keyed,
    /// The table has no primary key.
    Keyless,
}

/// Column types supported by table fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Serial,
    Integer,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Serial => "SERIAL",
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Definition of a single column of a [`TableFixture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDefinition {
    fn to_sql(&self) -> String {
        let mut definition = format!("{} {}", quote_identifier(&self.name), self.typ);

        if self.primary_key {
            definition.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            definition.push_str(" NOT NULL");
        }

        definition
    }
}

/// A table created by a single scenario.
///
/// Fixtures render the DDL and DML statements a scenario issues. Row values are always passed
/// as bind parameters, so the statements only contain identifiers and `$n` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFixture {
    name: String,
    key: KeyShape,
    columns: Vec<ColumnDefinition>,
}

impl TableFixture {
    /// Creates a fixture with an `id SERIAL PRIMARY KEY` column.
    pub fn keyed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyShape::Keyed,
            columns: vec![ColumnDefinition {
                name: KEY_COLUMN_NAME.to_string(),
                typ: ColumnType::Serial,
                nullable: false,
                primary_key: true,
            }],
        }
    }

    /// Creates a fixture without a primary key.
    pub fn keyless(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyShape::Keyless,
            columns: Vec::new(),
        }
    }

    /// Adds a non-key column.
    pub fn with_column(mut self, name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        self.columns.push(ColumnDefinition {
            name: name.into(),
            typ,
            nullable,
            primary_key: false,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> KeyShape {
        self.key
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Returns `CREATE TABLE name (...)`.
    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<Vec<_>>()
            .join(", ");

        format!("CREATE TABLE {} ({columns})", quote_identifier(&self.name))
    }

    /// Returns a single multi-row insert into `columns` with `rows` rows of placeholders.
    ///
    /// Placeholders are numbered row by row, so parameters must be supplied in row-major order.
    pub fn insert_statement(&self, columns: &[&str], rows: usize) -> String {
        let column_list = quote_column_list(columns);
        let values = (0..rows)
            .map(|row| {
                let placeholders = (0..columns.len())
                    .map(|column| format!("${}", row * columns.len() + column + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({placeholders})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({column_list}) VALUES {values}",
            quote_identifier(&self.name)
        )
    }

    /// Returns an update setting `columns` on every row of the table.
    pub fn update_all_statement(&self, columns: &[&str]) -> String {
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{} = ${}", quote_identifier(column), index + 1))
            .collect::<Vec<_>>()
            .join(", ");

        format!("UPDATE {} SET {assignments}", quote_identifier(&self.name))
    }

    /// Returns a delete of every row of the table.
    pub fn delete_all_statement(&self) -> String {
        format!("DELETE FROM {}", quote_identifier(&self.name))
    }
}

fn quote_column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}
