use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::Config as TokioPgConnectOptions;

use crate::shared::ServiceConfig;

/// Upper bound on establishing a single connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Static Postgres connection options that ensure sane defaults.
///
/// Applied to every connection so values round-trip the same way regardless of server settings.
pub struct DefaultPgConnectionOptions;

impl DefaultPgConnectionOptions {
    /// Returns the options as a string suitable for the tokio-postgres options parameter.
    pub fn to_options_string() -> String {
        "-c datestyle=ISO -c intervalstyle=postgres -c extra_float_digits=3 -c client_encoding=UTF8"
            .to_string()
    }
}

/// Configuration for connecting to the Postgres database the pipeline captures changes from.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking the password
/// into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the Postgres database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Creates a fresh, uniquely named database for every scenario group and drops it on stop.
    #[serde(default)]
    pub ephemeral: bool,
    /// Lifecycle of the database process.
    #[serde(default)]
    pub service: ServiceConfig,
}

impl PgConnectionConfig {
    /// Returns a copy of this configuration pointing at database `name`.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Renders the configuration as a libpq keyword/value connection string.
    ///
    /// This is the form handed to the pipeline process. Values are single-quoted with
    /// backslashes and quotes escaped, so names containing spaces survive.
    pub fn to_connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote_connection_value(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote_connection_value(&self.name)),
            format!("user={}", quote_connection_value(&self.username)),
        ];

        if let Some(password) = &self.password {
            parts.push(format!(
                "password={}",
                quote_connection_value(password.expose_secret())
            ));
        }

        parts.join(" ")
    }
}

fn quote_connection_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

/// A trait which can be used to convert the implementation into crate specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options for connecting to the server without selecting a database.
    ///
    /// Used for administrative operations such as creating or dropping databases.
    fn without_db(&self) -> Output;

    /// Creates connection options for connecting to the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .connect_timeout(CONNECT_TIMEOUT)
            .options(&DefaultPgConnectionOptions::to_options_string());

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(&self.name);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "oracle".to_string(),
            username: "postgres".to_string(),
            password: Some(SecretString::new("it's secret".to_string())),
            ephemeral: false,
            service: ServiceConfig::default(),
        }
    }

    #[test]
    fn connection_string_quotes_values() {
        assert_eq!(
            config().to_connection_string(),
            r"host='localhost' port=5432 dbname='oracle' user='postgres' password='it\'s secret'"
        );
    }

    #[test]
    fn with_name_only_changes_the_database() {
        let renamed = config().with_name("oracle_1234");

        assert_eq!(renamed.name, "oracle_1234");
        assert_eq!(renamed.host, "localhost");
        assert_eq!(renamed.port, 5432);
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", config());

        assert!(!rendered.contains("it's secret"));
    }

    #[test]
    fn tokio_options_select_the_database() {
        let options: TokioPgConnectOptions = config().with_db();

        assert_eq!(options.get_dbname(), Some("oracle"));
        assert_eq!(options.get_user(), Some("postgres"));
    }

    #[test]
    fn tokio_options_bound_the_connect_attempt() {
        let options: TokioPgConnectOptions = config().without_db();

        assert_eq!(options.get_connect_timeout(), Some(&CONNECT_TIMEOUT));
    }
}
