//! An in-memory stand-in for the database and the CDC pipeline.
//!
//! [`SimulatedPipeline`] implements [`Database`] by interpreting the statements rendered by
//! [`postgres::table::TableFixture`] against in-memory tables. Every committed row change is
//! published to a [`MemoryBus`] the way a correct CDC pipeline would publish it, in either wire
//! encoding. A [`PipelineFault`] makes it misbehave in a specific way, which lets tests check that
//! the scenarios catch the defect.

use std::collections::HashMap;
use std::sync::Arc;

use apache_avro::Schema;
use apache_avro::types::Value;
use postgres::params::SqlParam;
use postgres::table::ColumnType;
use tokio::sync::Mutex;
use tracing::debug;

use crate::EncodingFormat;
use crate::bail;
use crate::bus::memory::MemoryBus;
use crate::database::Database;
use crate::decoder::registry::MemorySchemaRegistry;
use crate::error::{ErrorKind, OracleResult};
use crate::scenario::topic_name;
use crate::test_utils::encoding::{encode_avro, encode_json};

/// Namespace of the Avro schemas registered by the simulated pipeline.
const SCHEMA_NAMESPACE: &str = "oracle.simulated";

/// A deliberate deviation from the delivery contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFault {
    /// Deletes on keyed tables publish nothing instead of a tombstone.
    DropTombstones,
    /// Deletes on keyless tables publish a message without key and value.
    PublishKeylessDeletes,
    /// Updates on keyed tables publish the row under a key of zero.
    RekeyUpdates,
}

#[derive(Debug, Clone, PartialEq)]
struct SimulatedColumn {
    name: String,
    typ: ColumnType,
    nullable: bool,
    primary_key: bool,
}

#[derive(Debug, Clone)]
struct AvroSchemas {
    key: Option<(u32, Schema)>,
    value: (u32, Schema),
}

#[derive(Debug)]
struct SimulatedTable {
    name: String,
    columns: Vec<SimulatedColumn>,
    rows: Vec<Vec<Option<SqlParam>>>,
    next_serial: i32,
    schemas: Option<AvroSchemas>,
}

impl SimulatedTable {
    fn key_position(&self) -> Option<usize> {
        self.columns.iter().position(|column| column.primary_key)
    }

    fn column_position(&self, name: &str) -> OracleResult<usize> {
        match self.columns.iter().position(|column| column.name == name) {
            Some(position) => Ok(position),
            None => bail!(
                ErrorKind::DatabaseQueryFailed,
                "Column does not exist",
                format!("column '{name}' of relation '{}' does not exist", self.name)
            ),
        }
    }
}

/// Statements understood by the simulated database.
#[derive(Debug, PartialEq)]
enum Statement {
    Create {
        table: String,
        columns: Vec<SimulatedColumn>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        rows: usize,
    },
    Update {
        table: String,
        columns: Vec<String>,
    },
    Delete {
        table: String,
    },
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, SimulatedTable>,
    statements: Vec<String>,
}

/// In-memory database whose changes are published by a simulated CDC pipeline.
#[derive(Debug, Clone)]
pub struct SimulatedPipeline {
    format: EncodingFormat,
    bus: MemoryBus,
    registry: MemorySchemaRegistry,
    topic_prefix: Option<String>,
    fault: Option<PipelineFault>,
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedPipeline {
    /// Creates a pipeline publishing `format` payloads to `bus`.
    ///
    /// Avro schemas are registered in `registry`.
    pub fn new(format: EncodingFormat, bus: MemoryBus, registry: MemorySchemaRegistry) -> Self {
        Self {
            format,
            bus,
            registry,
            topic_prefix: None,
            fault: None,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Publishes to `<prefix>.<table>` instead of `<table>`.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    /// Makes the pipeline misbehave.
    pub fn with_fault(mut self, fault: PipelineFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn topic_prefix(&self) -> Option<&str> {
        self.topic_prefix.as_deref()
    }

    /// Returns every statement executed so far, including failed ones.
    pub async fn statements(&self) -> Vec<String> {
        self.inner.lock().await.statements.clone()
    }

    /// Returns the number of rows currently stored in `table`.
    pub async fn row_count(&self, table: &str) -> Option<usize> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|table| table.rows.len())
    }

    async fn run(&self, statement: &str, params: &[SqlParam]) -> OracleResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.statements.push(statement.to_string());
        debug!(statement, params = params.len(), "simulating statement");

        match parse_statement(statement)? {
            Statement::Create { table, columns } => {
                if inner.tables.contains_key(&table) {
                    bail!(
                        ErrorKind::DatabaseQueryFailed,
                        "Relation already exists",
                        format!("relation '{table}' already exists")
                    );
                }

                let mut created = SimulatedTable {
                    name: table.clone(),
                    columns,
                    rows: Vec::new(),
                    next_serial: 1,
                    schemas: None,
                };
                if self.format == EncodingFormat::Avro {
                    created.schemas = Some(self.register_schemas(&created).await?);
                }
                inner.tables.insert(table, created);

                Ok(0)
            }
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let table = table_mut(&mut inner.tables, &table)?;
                if params.len() != columns.len() * rows {
                    bail!(
                        ErrorKind::DatabaseQueryFailed,
                        "Wrong number of bind parameters",
                        format!(
                            "statement needs {} parameters, got {}",
                            columns.len() * rows,
                            params.len()
                        )
                    );
                }

                let positions = columns
                    .iter()
                    .map(|column| table.column_position(column))
                    .collect::<OracleResult<Vec<_>>>()?;

                for row_params in params.chunks(columns.len().max(1)) {
                    let mut row = vec![None; table.columns.len()];
                    for (position, param) in positions.iter().zip(row_params) {
                        row[*position] = Some(param.clone());
                    }
                    if let Some(key) = table.key_position()
                        && row[key].is_none()
                    {
                        row[key] = Some(SqlParam::Int(table.next_serial));
                        table.next_serial += 1;
                    }
                    check_row(table, &row)?;

                    let key = self.encode_key(table, &row)?;
                    let value = self.encode_value(table, &row)?;
                    self.publish(&table.name, key, Some(value)).await;
                    table.rows.push(row);
                }

                Ok(rows as u64)
            }
            Statement::Update { table, columns } => {
                let table = table_mut(&mut inner.tables, &table)?;
                if params.len() != columns.len() {
                    bail!(
                        ErrorKind::DatabaseQueryFailed,
                        "Wrong number of bind parameters",
                        format!(
                            "statement needs {} parameters, got {}",
                            columns.len(),
                            params.len()
                        )
                    );
                }

                let positions = columns
                    .iter()
                    .map(|column| table.column_position(column))
                    .collect::<OracleResult<Vec<_>>>()?;

                let mut rows = table.rows.clone();
                for row in rows.iter_mut() {
                    for (position, param) in positions.iter().zip(params) {
                        row[*position] = Some(param.clone());
                    }
                    check_row(table, row)?;

                    let mut key_row = row.clone();
                    if self.fault == Some(PipelineFault::RekeyUpdates)
                        && let Some(key) = table.key_position()
                    {
                        key_row[key] = Some(SqlParam::Int(0));
                    }

                    let key = self.encode_key(table, &key_row)?;
                    let value = self.encode_value(table, row)?;
                    self.publish(&table.name, key, Some(value)).await;
                }
                let updated = rows.len() as u64;
                table.rows = rows;

                Ok(updated)
            }
            Statement::Delete { table } => {
                let table = table_mut(&mut inner.tables, &table)?;
                let rows = std::mem::take(&mut table.rows);

                for row in &rows {
                    match table.key_position() {
                        Some(_) if self.fault == Some(PipelineFault::DropTombstones) => {}
                        Some(_) => {
                            let key = self.encode_key(table, row)?;
                            self.publish(&table.name, key, None).await;
                        }
                        None if self.fault == Some(PipelineFault::PublishKeylessDeletes) => {
                            self.publish(&table.name, None, None).await;
                        }
                        None => {}
                    }
                }

                Ok(rows.len() as u64)
            }
        }
    }

    async fn publish(&self, table: &str, key: Option<Vec<u8>>, value: Option<Vec<u8>>) {
        let topic = topic_name(self.topic_prefix.as_deref(), table);
        self.bus.publish(&topic, key, value).await;
    }

    async fn register_schemas(&self, table: &SimulatedTable) -> OracleResult<AvroSchemas> {
        let key = match table.key_position() {
            Some(position) => {
                let definition = record_schema(
                    &format!("{}_pkey", table.name),
                    std::slice::from_ref(&table.columns[position]),
                );
                let id = self.registry.register(&definition).await;
                Some((id, Schema::parse_str(&definition)?))
            }
            None => None,
        };

        let definition = record_schema(&table.name, &table.columns);
        let id = self.registry.register(&definition).await;
        let value = (id, Schema::parse_str(&definition)?);

        Ok(AvroSchemas { key, value })
    }

    fn encode_key(
        &self,
        table: &SimulatedTable,
        row: &[Option<SqlParam>],
    ) -> OracleResult<Option<Vec<u8>>> {
        let Some(position) = table.key_position() else {
            return Ok(None);
        };

        let columns = std::slice::from_ref(&table.columns[position]);
        let values = std::slice::from_ref(&row[position]);
        let payload = match &table.schemas {
            Some(AvroSchemas {
                key: Some((id, schema)),
                ..
            }) => encode_avro(*id, schema, avro_record(columns, values))?,
            _ => encode_json(&json_record(columns, values))?,
        };

        Ok(Some(payload))
    }

    fn encode_value(
        &self,
        table: &SimulatedTable,
        row: &[Option<SqlParam>],
    ) -> OracleResult<Vec<u8>> {
        match &table.schemas {
            Some(AvroSchemas {
                value: (id, schema),
                ..
            }) => encode_avro(*id, schema, avro_record(&table.columns, row)),
            None => encode_json(&json_record(&table.columns, row)),
        }
    }
}

impl Database for SimulatedPipeline {
    async fn execute(&self, statement: &str) -> OracleResult<u64> {
        self.run(statement, &[]).await
    }

    async fn execute_params(&self, statement: &str, params: &[SqlParam]) -> OracleResult<u64> {
        self.run(statement, params).await
    }
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, SimulatedTable>,
    name: &str,
) -> OracleResult<&'a mut SimulatedTable> {
    match tables.get_mut(name) {
        Some(table) => Ok(table),
        None => bail!(
            ErrorKind::DatabaseQueryFailed,
            "Relation does not exist",
            format!("relation '{name}' does not exist")
        ),
    }
}

/// Enforces `NOT NULL` constraints and column types.
fn check_row(table: &SimulatedTable, row: &[Option<SqlParam>]) -> OracleResult<()> {
    for (column, value) in table.columns.iter().zip(row) {
        match (column.typ, value) {
            (_, None) if !column.nullable => bail!(
                ErrorKind::DatabaseQueryFailed,
                "Null value violates not-null constraint",
                format!("column '{}' of relation '{}'", column.name, table.name)
            ),
            (_, None) => {}
            (ColumnType::Serial | ColumnType::Integer, Some(SqlParam::Int(_))) => {}
            (ColumnType::Text, Some(SqlParam::Text(_))) => {}
            (typ, Some(value)) => bail!(
                ErrorKind::DatabaseQueryFailed,
                "Value does not match the column type",
                format!("column '{}' is {typ}, got {value}", column.name)
            ),
        }
    }

    Ok(())
}

fn avro_type(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Serial | ColumnType::Integer => "int",
        ColumnType::Text => "string",
    }
}

fn record_schema(name: &str, columns: &[SimulatedColumn]) -> String {
    let fields: Vec<serde_json::Value> = columns
        .iter()
        .map(|column| {
            let typ = if column.nullable {
                serde_json::json!(["null", avro_type(column.typ)])
            } else {
                serde_json::json!(avro_type(column.typ))
            };
            serde_json::json!({ "name": column.name, "type": typ })
        })
        .collect();

    serde_json::json!({
        "type": "record",
        "name": name,
        "namespace": SCHEMA_NAMESPACE,
        "fields": fields,
    })
    .to_string()
}

fn avro_record(columns: &[SimulatedColumn], row: &[Option<SqlParam>]) -> Value {
    let fields = columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            let value = match value {
                Some(SqlParam::Int(value)) => Value::Int(*value),
                Some(SqlParam::Text(value)) => Value::String(value.clone()),
                None => Value::Null,
            };
            let value = match (column.nullable, value) {
                (true, Value::Null) => Value::Union(0, Box::new(Value::Null)),
                (true, value) => Value::Union(1, Box::new(value)),
                (false, value) => value,
            };
            (column.name.clone(), value)
        })
        .collect();

    Value::Record(fields)
}

/// Renders a row with the JSON encoding of unions: every value is tagged with its type.
fn json_record(columns: &[SimulatedColumn], row: &[Option<SqlParam>]) -> serde_json::Value {
    let fields: serde_json::Map<String, serde_json::Value> = columns
        .iter()
        .zip(row)
        .map(|(column, value)| {
            let value = match value {
                Some(SqlParam::Int(value)) => serde_json::json!({ "int": value }),
                Some(SqlParam::Text(value)) => serde_json::json!({ "string": value }),
                None => serde_json::Value::Null,
            };
            (column.name.clone(), value)
        })
        .collect();

    serde_json::Value::Object(fields)
}

fn parse_statement(statement: &str) -> OracleResult<Statement> {
    let statement = statement.trim();

    if let Some(rest) = statement.strip_prefix("CREATE TABLE ") {
        let (table, definitions) = split_parenthesized(rest)?;
        let columns = definitions
            .split(", ")
            .map(parse_column)
            .collect::<OracleResult<Vec<_>>>()?;

        return Ok(Statement::Create { table, columns });
    }

    if let Some(rest) = statement.strip_prefix("INSERT INTO ") {
        let Some((target, values)) = rest.split_once(" VALUES ") else {
            return unsupported(statement);
        };
        let (table, columns) = split_parenthesized(target)?;
        let columns = columns.split(", ").map(unquote).collect();
        let rows = values.matches('(').count();

        return Ok(Statement::Insert {
            table,
            columns,
            rows,
        });
    }

    if let Some(rest) = statement.strip_prefix("UPDATE ") {
        let Some((table, assignments)) = rest.split_once(" SET ") else {
            return unsupported(statement);
        };
        let columns = assignments
            .split(", ")
            .map(|assignment| match assignment.split_once(" = ") {
                Some((column, _)) => Ok(unquote(column)),
                None => unsupported(statement),
            })
            .collect::<OracleResult<Vec<_>>>()?;

        return Ok(Statement::Update {
            table: unquote(table),
            columns,
        });
    }

    if let Some(table) = statement.strip_prefix("DELETE FROM ") {
        return Ok(Statement::Delete {
            table: unquote(table),
        });
    }

    unsupported(statement)
}

fn unsupported<T>(statement: &str) -> OracleResult<T> {
    bail!(
        ErrorKind::DatabaseQueryFailed,
        "Statement is not supported by the simulated database",
        statement
    );
}

/// Splits `name (inner)` into the unquoted name and `inner`.
fn split_parenthesized(text: &str) -> OracleResult<(String, &str)> {
    match (text.find(" ("), text.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            Ok((unquote(&text[..open]), &text[open + 2..close]))
        }
        _ => unsupported(text),
    }
}

fn parse_column(definition: &str) -> OracleResult<SimulatedColumn> {
    let mut parts = definition.split_whitespace();
    let (Some(name), Some(typ)) = (parts.next(), parts.next()) else {
        return unsupported(definition);
    };

    let typ = match typ {
        "SERIAL" => ColumnType::Serial,
        "INTEGER" => ColumnType::Integer,
        "TEXT" => ColumnType::Text,
        _ => return unsupported(definition),
    };
    let primary_key = definition.ends_with(" PRIMARY KEY");
    let nullable = !primary_key && !definition.ends_with(" NOT NULL");

    Ok(SimulatedColumn {
        name: unquote(name),
        typ,
        nullable,
        primary_key,
    })
}

fn unquote(identifier: &str) -> String {
    let identifier = identifier.trim();
    match identifier
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => identifier.to_string(),
    }
}
