use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{Instrument, debug, error, info};

use crate::params::{SqlParam, to_sql_params};

/// Slots are cluster-wide, so the lookup is restricted to the connected database.
const REPLICATION_SLOT_EXISTS_QUERY: &str = "select exists(select 1 from pg_replication_slots \
     where slot_name = $1 and database = current_database())";

/// Connects with `config` and spawns the connection task in the background.
///
/// There is no need to track the task since the returned [`Client`] terminates the connection
/// when dropped.
async fn connect(config: Config) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = config.connect(NoTls).await?;

    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => debug!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);
    tokio::spawn(task);

    Ok(client)
}

/// A live connection to the database the CDC pipeline captures changes from.
#[derive(Debug)]
pub struct PgDatabase {
    config: PgConnectionConfig,
    client: Client,
}

impl PgDatabase {
    /// Connects to the database named in `config`.
    pub async fn connect(config: PgConnectionConfig) -> Result<Self, tokio_postgres::Error> {
        let client = connect(config.with_db()).await?;

        Ok(Self { config, client })
    }

    /// Creates the database named in `config` and connects to it.
    pub async fn create(config: PgConnectionConfig) -> Result<Self, tokio_postgres::Error> {
        let admin = connect(config.without_db()).await?;
        admin
            .execute(
                &format!("create database {}", quote_identifier(&config.name)),
                &[],
            )
            .await?;

        info!(database = %config.name, "created database");

        Self::connect(config).await
    }

    /// Drops the database named in `config`, terminating the sessions still connected to it.
    pub async fn drop_database(config: &PgConnectionConfig) -> Result<(), tokio_postgres::Error> {
        let admin = connect(config.without_db()).await?;

        admin
            .execute(
                &format!(
                    "select pg_terminate_backend(pid) from pg_stat_activity \
                     where datname = {} and pid <> pg_backend_pid()",
                    quote_literal(&config.name)
                ),
                &[],
            )
            .await?;
        admin
            .execute(
                &format!("drop database if exists {}", quote_identifier(&config.name)),
                &[],
            )
            .await?;

        info!(database = %config.name, "dropped database");

        Ok(())
    }

    pub fn config(&self) -> &PgConnectionConfig {
        &self.config
    }

    /// Executes a statement without parameters, returning the number of rows it affected.
    pub async fn execute(&self, statement: &str) -> Result<u64, tokio_postgres::Error> {
        debug!(statement, "executing statement");

        self.client.execute(statement, &[]).await
    }

    /// Executes a parameterized statement, returning the number of rows it affected.
    pub async fn execute_params(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<u64, tokio_postgres::Error> {
        debug!(statement, params = params.len(), "executing statement");

        self.client
            .execute(statement, &to_sql_params(params))
            .await
    }

    /// Checks that the server answers queries.
    pub async fn ping(&self) -> Result<(), tokio_postgres::Error> {
        self.client.simple_query("select 1").await.map(|_| ())
    }

    /// Returns whether a replication slot named `slot_name` exists on the connected database.
    pub async fn replication_slot_exists(
        &self,
        slot_name: &str,
    ) -> Result<bool, tokio_postgres::Error> {
        let row = self
            .client
            .query_one(REPLICATION_SLOT_EXISTS_QUERY, &[&slot_name])
            .await?;

        Ok(row.get(0))
    }

    /// Returns whether the connection to the server has been closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_lookup_ignores_slots_of_other_databases() {
        assert!(REPLICATION_SLOT_EXISTS_QUERY.contains("slot_name = $1"));
        assert!(REPLICATION_SLOT_EXISTS_QUERY.contains("database = current_database()"));
    }
}
