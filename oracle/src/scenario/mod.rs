//! The CDC delivery contract, expressed as scenarios.
//!
//! Each scenario creates its own table, mutates it through a [`Database`] and checks the change
//! messages the pipeline published for it. Scenarios only see decoded records, so the same code
//! validates every wire encoding. Tables, and therefore topics, are claimed by name before any
//! statement is issued: scenarios of a group share one environment and must never observe each
//! other's changes.

mod assertions;
mod report;

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use postgres::params::SqlParam;
use postgres::table::{ColumnType, TableFixture};
use tracing::{info, warn};

use crate::EncodingFormat;
use crate::bail;
use crate::bus::MessageBus;
use crate::collector::{DEFAULT_COLLECT_TIMEOUT, MessageCollector};
use crate::concurrency::clock::{Clock, TokioClock};
use crate::database::Database;
use crate::decoder::{DecodedMessage, Decoder, decode_message};
use crate::error::{ErrorKind, OracleResult};

use assertions::{
    expect_int, expect_key, expect_no_key, expect_same_key, expect_string, expect_tombstone,
    expect_value,
};
pub use report::{ScenarioOutcome, ScenarioReport};

/// Rows inserted by the keyed insert scenario unless configured otherwise.
pub const DEFAULT_INSERT_COUNT: usize = 10;

/// Returns the topic the pipeline publishes the changes of `table` to.
pub fn topic_name(prefix: Option<&str>, table: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{table}"),
        None => table.to_string(),
    }
}

/// One behavior of the delivery contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    KeyedInsert,
    KeyedDelete,
    KeyedUpdate,
    UnkeyedInsert,
    UnkeyedDelete,
    UnkeyedUpdate,
}

impl Scenario {
    /// Every scenario, in the order [`ScenarioRunner::run_all`] executes them.
    pub const ALL: [Scenario; 6] = [
        Scenario::KeyedInsert,
        Scenario::KeyedDelete,
        Scenario::KeyedUpdate,
        Scenario::UnkeyedInsert,
        Scenario::UnkeyedDelete,
        Scenario::UnkeyedUpdate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::KeyedInsert => "keyed insert",
            Scenario::KeyedDelete => "keyed delete",
            Scenario::KeyedUpdate => "keyed update",
            Scenario::UnkeyedInsert => "unkeyed insert",
            Scenario::UnkeyedDelete => "unkeyed delete",
            Scenario::UnkeyedUpdate => "unkeyed update",
        }
    }

    /// Returns the table the scenario creates.
    pub fn table(&self) -> TableFixture {
        match self {
            Scenario::KeyedInsert => {
                TableFixture::keyed("things").with_column("thing", ColumnType::Integer, false)
            }
            Scenario::KeyedDelete => {
                TableFixture::keyed("widgets").with_column("widget", ColumnType::Text, true)
            }
            Scenario::KeyedUpdate => {
                TableFixture::keyed("gadgets").with_column("gadget", ColumnType::Text, true)
            }
            Scenario::UnkeyedInsert => {
                TableFixture::keyless("logs").with_column("message", ColumnType::Text, false)
            }
            Scenario::UnkeyedDelete => {
                TableFixture::keyless("events").with_column("details", ColumnType::Text, false)
            }
            Scenario::UnkeyedUpdate => {
                TableFixture::keyless("numbers").with_column("number", ColumnType::Integer, false)
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs scenarios of one group against a shared environment.
///
/// The runner owns the collector of the group, so messages received for one topic are never
/// returned for another. The decoder is injected and fixes the encoding of the whole group.
#[derive(Debug)]
pub struct ScenarioRunner<D, B, K, C = TokioClock> {
    database: D,
    collector: MessageCollector<B, C>,
    decoder: K,
    topic_prefix: Option<String>,
    timeout: Duration,
    insert_count: usize,
    claimed: HashSet<String>,
}

impl<D, B, K, C> ScenarioRunner<D, B, K, C>
where
    D: Database,
    B: MessageBus,
    K: Decoder,
    C: Clock,
{
    pub fn new(database: D, collector: MessageCollector<B, C>, decoder: K) -> Self {
        Self {
            database,
            collector,
            decoder,
            topic_prefix: None,
            timeout: DEFAULT_COLLECT_TIMEOUT,
            insert_count: DEFAULT_INSERT_COUNT,
            claimed: HashSet::new(),
        }
    }

    /// Observes `<prefix>.<table>` topics instead of `<table>`.
    pub fn with_topic_prefix(mut self, prefix: Option<String>) -> Self {
        self.topic_prefix = prefix;
        self
    }

    /// Sets how long each collect waits for the expected messages.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the rows inserted by the keyed insert scenario; at least one row is inserted.
    pub fn with_insert_count(mut self, insert_count: usize) -> Self {
        self.insert_count = insert_count.max(1);
        self
    }

    pub fn format(&self) -> EncodingFormat {
        self.decoder.format()
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn collector(&self) -> &MessageCollector<B, C> {
        &self.collector
    }

    /// Consumes the runner and returns its collector, e.g. to close the bus.
    pub fn into_collector(self) -> MessageCollector<B, C> {
        self.collector
    }

    pub fn topic_for(&self, table: &str) -> String {
        topic_name(self.topic_prefix.as_deref(), table)
    }

    /// Reserves `table` for the calling scenario.
    ///
    /// Fails with [`ErrorKind::NameCollision`] if another scenario of the group claimed it.
    pub fn claim_table(&mut self, table: &str) -> OracleResult<()> {
        if !self.claimed.insert(table.to_string()) {
            bail!(
                ErrorKind::NameCollision,
                "Table is already used by another scenario of the group",
                format!("table '{table}' was claimed twice")
            );
        }

        Ok(())
    }

    pub async fn run(&mut self, scenario: Scenario) -> OracleResult<()> {
        match scenario {
            Scenario::KeyedInsert => self.keyed_insert().await,
            Scenario::KeyedDelete => self.keyed_delete().await,
            Scenario::KeyedUpdate => self.keyed_update().await,
            Scenario::UnkeyedInsert => self.unkeyed_insert().await,
            Scenario::UnkeyedDelete => self.unkeyed_delete().await,
            Scenario::UnkeyedUpdate => self.unkeyed_update().await,
        }
    }

    /// Runs every scenario, continuing past failures.
    pub async fn run_all(&mut self) -> ScenarioReport {
        let format = self.format();
        let mut report = ScenarioReport::new(format);

        for scenario in Scenario::ALL {
            info!(%scenario, %format, "running scenario");
            let started = Instant::now();
            let result = self.run(scenario).await;
            let elapsed = started.elapsed();

            match &result {
                Ok(()) => info!(%scenario, %format, ?elapsed, "scenario passed"),
                Err(err) => warn!(%scenario, %format, ?elapsed, error = %err, "scenario failed"),
            }

            report.push(ScenarioOutcome {
                scenario,
                result,
                elapsed,
            });
        }

        report
    }

    /// Inserted rows are published in order, keyed by their ascending serial ids.
    pub async fn keyed_insert(&mut self) -> OracleResult<()> {
        let table = Scenario::KeyedInsert.table();
        let topic = self.prepare(&table).await?;

        let count = self.insert_count;
        let params: Vec<SqlParam> = (1..=count as i32).map(SqlParam::Int).collect();
        self.database
            .execute_params(&table.insert_statement(&["thing"], count), &params)
            .await?;

        let messages = self.collect(&topic, count).await?;
        for (position, message) in messages.iter().enumerate() {
            let expected = position as i64 + 1;

            expect_int(expect_key(message)?, "id", expected)?;
            let value = expect_value(message)?;
            expect_int(value, "id", expected)?;
            expect_int(value, "thing", expected)?;
        }

        Ok(())
    }

    /// Deleting a keyed row publishes a tombstone under the key of the row.
    pub async fn keyed_delete(&mut self) -> OracleResult<()> {
        let table = Scenario::KeyedDelete.table();
        let topic = self.prepare(&table).await?;

        self.database
            .execute_params(&table.insert_statement(&["widget"], 1), &[SqlParam::from("Hello")])
            .await?;
        self.database
            .execute(&table.delete_all_statement())
            .await?;

        let messages = self.collect(&topic, 2).await?;
        let (insert, delete) = (&messages[0], &messages[1]);
        expect_string(expect_value(insert)?, "widget", "Hello")?;
        expect_tombstone(delete)?;
        expect_same_key(insert, delete)?;

        Ok(())
    }

    /// Updating a keyed row publishes the full new row under the unchanged key.
    pub async fn keyed_update(&mut self) -> OracleResult<()> {
        let table = Scenario::KeyedUpdate.table();
        let topic = self.prepare(&table).await?;

        self.database
            .execute_params(&table.insert_statement(&["gadget"], 1), &[SqlParam::from("Hello")])
            .await?;
        self.database
            .execute_params(&table.update_all_statement(&["gadget"]), &[SqlParam::from("Goodbye")])
            .await?;

        let messages = self.collect(&topic, 2).await?;
        let (insert, update) = (&messages[0], &messages[1]);
        expect_string(expect_value(insert)?, "gadget", "Hello")?;
        expect_same_key(insert, update)?;

        let value = expect_value(update)?;
        expect_string(value, "gadget", "Goodbye")?;
        expect_int(value, "id", expect_key(insert)?.fetch_int("id")?)?;

        Ok(())
    }

    /// Rows of keyless tables are published without a key.
    pub async fn unkeyed_insert(&mut self) -> OracleResult<()> {
        let table = Scenario::UnkeyedInsert.table();
        let topic = self.prepare(&table).await?;

        self.database
            .execute_params(
                &table.insert_statement(&["message"], 1),
                &[SqlParam::from("Launching missiles")],
            )
            .await?;

        let messages = self.collect(&topic, 1).await?;
        expect_no_key(&messages[0])?;
        expect_string(expect_value(&messages[0])?, "message", "Launching missiles")?;

        Ok(())
    }

    /// Deletes on keyless tables publish nothing.
    ///
    /// The delete is surrounded by two inserts, whose messages must be adjacent.
    pub async fn unkeyed_delete(&mut self) -> OracleResult<()> {
        let table = Scenario::UnkeyedDelete.table();
        let topic = self.prepare(&table).await?;
        let insert = table.insert_statement(&["details"], 1);

        self.database
            .execute_params(&insert, &[SqlParam::from("User 1 signup")])
            .await?;
        self.database
            .execute(&table.delete_all_statement())
            .await?;
        self.database
            .execute_params(&insert, &[SqlParam::from("User 2 signup")])
            .await?;

        let messages = self.collect(&topic, 2).await?;
        for (message, expected) in messages.iter().zip(["User 1 signup", "User 2 signup"]) {
            expect_no_key(message)?;
            expect_string(expect_value(message)?, "details", expected)?;
        }

        Ok(())
    }

    /// Updates on keyless tables publish the new row after the original one.
    pub async fn unkeyed_update(&mut self) -> OracleResult<()> {
        let table = Scenario::UnkeyedUpdate.table();
        let topic = self.prepare(&table).await?;

        self.database
            .execute_params(&table.insert_statement(&["number"], 1), &[SqlParam::Int(42)])
            .await?;
        self.database
            .execute_params(&table.update_all_statement(&["number"]), &[SqlParam::Int(43)])
            .await?;

        let messages = self.collect(&topic, 2).await?;
        for (message, expected) in messages.iter().zip([42, 43]) {
            expect_no_key(message)?;
            expect_int(expect_value(message)?, "number", expected)?;
        }

        Ok(())
    }

    /// Claims and creates `table`, then starts observing its topic.
    async fn prepare(&mut self, table: &TableFixture) -> OracleResult<String> {
        self.claim_table(table.name())?;
        let topic = self.topic_for(table.name());

        self.database.execute(&table.create_statement()).await?;
        self.collector.observe(&topic).await?;

        Ok(topic)
    }

    async fn collect(&mut self, topic: &str, count: usize) -> OracleResult<Vec<DecodedMessage>> {
        let messages = self.collector.collect(topic, count, self.timeout).await?;

        let mut decoded = Vec::with_capacity(messages.len());
        for message in &messages {
            decoded.push(decode_message(&self.decoder, message).await?);
        }

        Ok(decoded)
    }
}
