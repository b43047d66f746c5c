use std::future::Future;

use postgres::params::SqlParam;
use postgres::tokio::PgDatabase;

use crate::error::OracleResult;

/// The database whose changes the CDC pipeline captures.
///
/// Statements are expected to be committed when the returned future resolves, so the changes
/// they make are visible to the pipeline.
pub trait Database {
    /// Executes a statement without parameters, returning the number of affected rows.
    fn execute(&self, statement: &str) -> impl Future<Output = OracleResult<u64>> + Send;

    /// Executes a statement whose `$n` placeholders are bound to `params`.
    fn execute_params(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> impl Future<Output = OracleResult<u64>> + Send;
}

impl Database for PgDatabase {
    async fn execute(&self, statement: &str) -> OracleResult<u64> {
        Ok(PgDatabase::execute(self, statement).await?)
    }

    async fn execute_params(&self, statement: &str, params: &[SqlParam]) -> OracleResult<u64> {
        Ok(PgDatabase::execute_params(self, statement, params).await?)
    }
}

impl<D> Database for &D
where
    D: Database + Sync,
{
    fn execute(&self, statement: &str) -> impl Future<Output = OracleResult<u64>> + Send {
        (**self).execute(statement)
    }

    fn execute_params(
        &self,
        statement: &str,
        params: &[SqlParam],
    ) -> impl Future<Output = OracleResult<u64>> + Send {
        (**self).execute_params(statement, params)
    }
}
