//! Lifecycle of the collaborators a scenario group runs against.
//!
//! A [`TestEnvironment`] brings up the database, the message bus, the schema registry and the CDC
//! pipeline, in that order, and tears them down in reverse. It is created once per scenario group
//! and can only be started once.

mod process;
mod readiness;

use std::fmt;

use config::shared::{
    BusConfig, HarnessConfig, PgConnectionConfig, SchemaRegistryConfig, ServiceConfig,
    ValidationError,
};
use postgres::tokio::PgDatabase;
use tracing::{info, warn};
use uuid::Uuid;

use crate::EncodingFormat;
use crate::bail;
use crate::bus::rest_proxy::RestProxyBus;
use crate::collector::MessageCollector;
use crate::concurrency::clock::{Clock, TokioClock};
use crate::decoder::FormatDecoder;
use crate::decoder::avro::AvroDecoder;
use crate::decoder::json::JsonDecoder;
use crate::decoder::registry::HttpSchemaRegistry;
use crate::error::{ErrorKind, OracleError, OracleResult};
use crate::failpoints::{
    START_BUS, START_DATABASE, START_PIPELINE, START_SCHEMA_REGISTRY, oracle_fail_point,
};
use crate::oracle_error;
use crate::scenario::{ScenarioRunner, topic_name};

pub use process::{ManagedProcess, pipeline_command, run_command};
pub use readiness::{HttpProbe, wait_until_ready};

/// Prefix of the names generated for ephemeral databases and unique topic prefixes.
const GENERATED_NAME_PREFIX: &str = "oracle";

/// A collaborator managed by a [`TestEnvironment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Database,
    Bus,
    SchemaRegistry,
    Pipeline,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collaborator::Database => "database",
            Collaborator::Bus => "bus",
            Collaborator::SchemaRegistry => "schema registry",
            Collaborator::Pipeline => "pipeline",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a [`TestEnvironment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    NotStarted,
    Running,
    Stopped,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvironmentState::NotStarted => "not started",
            EnvironmentState::Running => "running",
            EnvironmentState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything started by [`TestEnvironment::start`], torn down by [`TestEnvironment::stop`].
#[derive(Debug, Default)]
struct Services {
    /// Collaborators whose startup began, in start order.
    started: Vec<Collaborator>,
    processes: Vec<ManagedProcess>,
    database: Option<PgDatabase>,
    /// Database created for the group, dropped on stop.
    ephemeral_database: Option<PgConnectionConfig>,
}

impl Services {
    fn take_process(&mut self, collaborator: Collaborator) -> Option<ManagedProcess> {
        let position = self
            .processes
            .iter()
            .position(|process| process.collaborator() == collaborator)?;

        Some(self.processes.remove(position))
    }

    fn process_mut(&mut self, collaborator: Collaborator) -> Option<&mut ManagedProcess> {
        self.processes
            .iter_mut()
            .find(|process| process.collaborator() == collaborator)
    }
}

/// The collaborators of one scenario group.
///
/// Collaborators with a start command are spawned by the environment; the others are expected to
/// be running already and are only probed. Every collaborator must become ready within the
/// configured startup timeout.
#[derive(Debug)]
pub struct TestEnvironment<C = TokioClock> {
    config: HarnessConfig,
    format: EncodingFormat,
    clock: C,
    state: EnvironmentState,
    topic_prefix: Option<String>,
    services: Option<Services>,
    probe: HttpProbe,
}

impl TestEnvironment {
    /// Creates an environment running the format configured in `config`.
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_clock(config, TokioClock)
    }
}

impl<C> TestEnvironment<C>
where
    C: Clock + Clone,
{
    /// Creates an environment whose readiness waits go through `clock`.
    pub fn with_clock(config: HarnessConfig, clock: C) -> Self {
        let format = config.format;

        Self {
            config,
            format,
            clock,
            state: EnvironmentState::NotStarted,
            topic_prefix: None,
            services: None,
            probe: HttpProbe::new(),
        }
    }

    /// Selects the encoding the pipeline emits for the whole group.
    pub fn configure(&mut self, format: EncodingFormat) -> OracleResult<()> {
        if self.state != EnvironmentState::NotStarted {
            bail!(
                ErrorKind::InvalidState,
                "Environment can only be configured before it is started",
                format!("environment is {}", self.state)
            );
        }

        self.format = format;

        Ok(())
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn bus_config(&self) -> &BusConfig {
        &self.config.bus
    }

    pub fn registry_config(&self) -> Option<&SchemaRegistryConfig> {
        self.config.schema_registry.as_ref()
    }

    /// Returns the prefix of the topics the pipeline publishes to, once started.
    pub fn topic_prefix(&self) -> Option<&str> {
        self.topic_prefix.as_deref()
    }

    pub fn topic_for(&self, table: &str) -> String {
        topic_name(self.topic_prefix(), table)
    }

    /// Returns the connection to the database captured by the pipeline.
    ///
    /// Only available while the environment is running.
    pub fn database(&self) -> OracleResult<&PgDatabase> {
        match self.services.as_ref().and_then(|services| services.database.as_ref()) {
            Some(database) if self.state == EnvironmentState::Running => Ok(database),
            _ => bail!(
                ErrorKind::InvalidState,
                "Database is only available while the environment is running",
                format!("environment is {}", self.state)
            ),
        }
    }

    /// Returns a decoder for the configured format.
    pub fn decoder(&self) -> OracleResult<FormatDecoder<HttpSchemaRegistry>> {
        match self.format {
            EncodingFormat::Json => Ok(FormatDecoder::Json(JsonDecoder::new())),
            EncodingFormat::Avro => match self.registry_config() {
                Some(registry) => Ok(FormatDecoder::Avro(AvroDecoder::new(
                    HttpSchemaRegistry::from_config(registry),
                ))),
                None => Err(config_error(ValidationError::MissingSchemaRegistry)),
            },
        }
    }

    /// Returns a collector consuming the bus through the REST proxy.
    pub fn collector(&self) -> MessageCollector<RestProxyBus, C> {
        MessageCollector::with_clock(RestProxyBus::from_config(&self.config.bus), self.clock.clone())
            .with_poll_interval(self.config.collect_poll_interval())
    }

    /// Returns a runner for the scenarios of this group.
    pub fn scenario_runner(
        &self,
    ) -> OracleResult<ScenarioRunner<&PgDatabase, RestProxyBus, FormatDecoder<HttpSchemaRegistry>, C>>
    {
        let runner = ScenarioRunner::new(self.database()?, self.collector(), self.decoder()?)
            .with_topic_prefix(self.topic_prefix.clone())
            .with_timeout(self.config.collect_timeout());

        Ok(runner)
    }

    /// Brings up every collaborator and waits until each one is ready.
    ///
    /// On failure everything started so far is stopped and the environment ends up
    /// [`EnvironmentState::Stopped`].
    pub async fn start(&mut self) -> OracleResult<()> {
        if self.state != EnvironmentState::NotStarted {
            bail!(
                ErrorKind::InvalidState,
                "Environment can only be started once",
                format!("environment is {}", self.state)
            );
        }

        self.config.validate_for(self.format).map_err(config_error)?;

        info!(format = %self.format, "starting environment");
        self.topic_prefix = if self.config.pipeline.unique_topic_prefix {
            Some(generate_name())
        } else {
            self.config.pipeline.topic_prefix.clone()
        };

        let mut services = Services::default();
        match self.start_collaborators(&mut services).await {
            Ok(()) => {
                self.services = Some(services);
                self.state = EnvironmentState::Running;
                info!(format = %self.format, topic_prefix = ?self.topic_prefix, "environment is running");

                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "environment failed to start, stopping started collaborators");
                self.teardown(services).await;
                self.state = EnvironmentState::Stopped;

                Err(err)
            }
        }
    }

    /// Tears down every collaborator, in reverse start order.
    ///
    /// Teardown is best-effort: failures are logged and never returned. Stopping an environment
    /// that is not running only marks it stopped.
    pub async fn stop(&mut self) {
        if let Some(services) = self.services.take() {
            info!(format = %self.format, "stopping environment");
            self.teardown(services).await;
            info!(format = %self.format, "environment stopped");
        }

        self.state = EnvironmentState::Stopped;
    }

    async fn start_collaborators(&self, services: &mut Services) -> OracleResult<()> {
        let database_config = self.start_database(services).await?;
        self.start_bus(services).await?;
        if let Some(registry) = self.registry_config() {
            self.start_schema_registry(services, registry).await?;
        }
        self.start_pipeline(services, &database_config).await?;

        Ok(())
    }

    /// Starts the database and returns the configuration of the database the pipeline captures.
    async fn start_database(&self, services: &mut Services) -> OracleResult<PgConnectionConfig> {
        oracle_fail_point(START_DATABASE)?;
        let config = &self.config.database;
        self.start_service(services, Collaborator::Database, &config.service)?;

        let database = self
            .wait(Collaborator::Database, async || {
                if let Some(process) = services.process_mut(Collaborator::Database) {
                    process.ensure_not_failed()?;
                }

                let database = PgDatabase::connect(config.clone()).await?;
                database.ping().await?;

                Ok(database)
            })
            .await?;

        if !config.ephemeral {
            services.database = Some(database);
            return Ok(config.clone());
        }

        drop(database);
        let ephemeral = config.with_name(generate_name());
        services.ephemeral_database = Some(ephemeral.clone());
        let database = PgDatabase::create(ephemeral.clone()).await.map_err(|err| {
            oracle_error!(
                ErrorKind::StartupFailure,
                "Failed to create the ephemeral database",
                format!("database '{}': {err}", ephemeral.name),
                source: err
            )
        })?;
        services.database = Some(database);

        Ok(ephemeral)
    }

    async fn start_bus(&self, services: &mut Services) -> OracleResult<()> {
        oracle_fail_point(START_BUS)?;
        let config = &self.config.bus;
        self.start_service(services, Collaborator::Bus, &config.service)?;

        let url = format!("{}/topics", config.rest_proxy_url.trim_end_matches('/'));
        self.wait(Collaborator::Bus, async || {
            if let Some(process) = services.process_mut(Collaborator::Bus) {
                process.ensure_not_failed()?;
            }

            self.probe.get(&url, ErrorKind::BusError).await
        })
        .await
    }

    async fn start_schema_registry(
        &self,
        services: &mut Services,
        config: &SchemaRegistryConfig,
    ) -> OracleResult<()> {
        oracle_fail_point(START_SCHEMA_REGISTRY)?;
        self.start_service(services, Collaborator::SchemaRegistry, &config.service)?;

        let url = format!("{}/subjects", config.url.trim_end_matches('/'));
        self.wait(Collaborator::SchemaRegistry, async || {
            if let Some(process) = services.process_mut(Collaborator::SchemaRegistry) {
                process.ensure_not_failed()?;
            }

            self.probe.get(&url, ErrorKind::RegistryError).await
        })
        .await
    }

    async fn start_pipeline(
        &self,
        services: &mut Services,
        database_config: &PgConnectionConfig,
    ) -> OracleResult<()> {
        oracle_fail_point(START_PIPELINE)?;
        services.started.push(Collaborator::Pipeline);

        let command = pipeline_command(
            &self.config.pipeline,
            self.format,
            database_config,
            &self.config.bus,
            self.topic_prefix(),
            self.registry_config().map(|registry| registry.url.as_str()),
        );
        services
            .processes
            .push(ManagedProcess::spawn(Collaborator::Pipeline, &command)?);

        let slot_name = &self.config.pipeline.slot_name;
        self.wait(Collaborator::Pipeline, async || {
            let Some(process) = services.process_mut(Collaborator::Pipeline) else {
                bail!(ErrorKind::StartupFailure, "Pipeline process is not running");
            };
            process.ensure_running()?;

            let Some(database) = services.database.as_ref() else {
                bail!(ErrorKind::StartupFailure, "Database is not connected");
            };
            if !database.replication_slot_exists(slot_name).await? {
                bail!(
                    ErrorKind::DatabaseQueryFailed,
                    "Replication slot does not exist yet",
                    format!("slot '{slot_name}'")
                );
            }

            Ok(())
        })
        .await
    }

    /// Spawns the start command of `collaborator`, if it has one.
    fn start_service(
        &self,
        services: &mut Services,
        collaborator: Collaborator,
        service: &ServiceConfig,
    ) -> OracleResult<()> {
        services.started.push(collaborator);

        match &service.start {
            Some(command) => {
                let process = ManagedProcess::spawn(collaborator, command)?;
                services.processes.push(process);
            }
            None => info!(%collaborator, "collaborator is managed externally, probing only"),
        }

        Ok(())
    }

    async fn wait<P, T>(&self, collaborator: Collaborator, probe: P) -> OracleResult<T>
    where
        P: AsyncFnMut() -> OracleResult<T>,
    {
        wait_until_ready(
            &self.clock,
            collaborator,
            self.config.startup_timeout(),
            self.config.startup_poll_interval(),
            probe,
        )
        .await
    }

    async fn teardown(&self, mut services: Services) {
        for collaborator in services.started.clone().into_iter().rev() {
            if collaborator == Collaborator::Database {
                self.teardown_database(&mut services).await;
            }

            if let Some(process) = services.take_process(collaborator)
                && let Err(err) = process.terminate().await
            {
                warn!(%collaborator, error = %err, "failed to terminate process");
            }

            if let Some(command) = self
                .service_config(collaborator)
                .and_then(|service| service.stop.as_ref())
                && let Err(err) = run_command(collaborator, command).await
            {
                warn!(%collaborator, error = %err, "failed to stop collaborator");
            }

            info!(%collaborator, "collaborator stopped");
        }
    }

    async fn teardown_database(&self, services: &mut Services) {
        services.database = None;

        if let Some(ephemeral) = services.ephemeral_database.take()
            && let Err(err) = PgDatabase::drop_database(&ephemeral).await
        {
            warn!(database = %ephemeral.name, error = %err, "failed to drop ephemeral database");
        }
    }

    /// Returns the service configuration of collaborators that have one.
    fn service_config(&self, collaborator: Collaborator) -> Option<&ServiceConfig> {
        match collaborator {
            Collaborator::Database => Some(&self.config.database.service),
            Collaborator::Bus => Some(&self.config.bus.service),
            Collaborator::SchemaRegistry => self
                .config
                .schema_registry
                .as_ref()
                .map(|registry| &registry.service),
            Collaborator::Pipeline => None,
        }
    }
}

impl<C> Drop for TestEnvironment<C> {
    fn drop(&mut self) {
        if self.state == EnvironmentState::Running {
            warn!(format = %self.format, "environment dropped while running, killing its processes");
        }
    }
}

fn config_error(err: ValidationError) -> OracleError {
    oracle_error!(
        ErrorKind::ConfigError,
        "Invalid harness configuration",
        err.to_string(),
        source: err
    )
}

/// Returns a name unique to this scenario group, usable as database name and topic prefix.
fn generate_name() -> String {
    format!("{GENERATED_NAME_PREFIX}_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use config::shared::{CollectorConfig, PipelineConfig};

    use super::*;
    use crate::test_utils::clock::ManualClock;

    fn config() -> HarnessConfig {
        HarnessConfig {
            format: EncodingFormat::Json,
            startup_timeout_ms: 50,
            startup_poll_interval_ms: 10,
            database: PgConnectionConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                name: "postgres".to_string(),
                username: "postgres".to_string(),
                password: None,
                ephemeral: false,
                service: ServiceConfig::default(),
            },
            bus: BusConfig {
                brokers: "127.0.0.1:1".to_string(),
                rest_proxy_url: "http://127.0.0.1:1".to_string(),
                consumer_group: "cdc-oracle".to_string(),
                service: ServiceConfig::default(),
            },
            schema_registry: None,
            pipeline: PipelineConfig {
                program: "bottledwater".to_string(),
                args: vec![],
                slot_name: "oracle".to_string(),
                topic_prefix: Some("static".to_string()),
                unique_topic_prefix: false,
            },
            collector: CollectorConfig::default(),
        }
    }

    fn environment() -> TestEnvironment<ManualClock> {
        TestEnvironment::with_clock(config(), ManualClock::new())
    }

    #[tokio::test]
    async fn stopping_is_idempotent() {
        let mut environment = environment();

        environment.stop().await;
        assert_eq!(environment.state(), EnvironmentState::Stopped);

        environment.stop().await;
        assert_eq!(environment.state(), EnvironmentState::Stopped);
    }

    #[tokio::test]
    async fn stopped_environments_cannot_be_reused() {
        let mut environment = environment();
        environment.stop().await;

        let error = environment.configure(EncodingFormat::Avro).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);

        let error = environment.start().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn avro_without_registry_is_rejected_before_starting() {
        let mut environment = environment();
        environment.configure(EncodingFormat::Avro).unwrap();

        let error = environment.start().await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::ConfigError);
        assert_eq!(environment.state(), EnvironmentState::NotStarted);
        assert!(environment.decoder().is_err());
    }

    #[tokio::test]
    async fn unreachable_database_fails_startup() {
        let clock = ManualClock::new();
        let mut environment = TestEnvironment::with_clock(config(), clock.clone());

        let error = environment.start().await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::StartupFailure);
        assert!(error.detail().unwrap().starts_with("database not ready"));
        assert_eq!(environment.state(), EnvironmentState::Stopped);
        assert_eq!(clock.elapsed(), Duration::from_millis(50));
        assert!(environment.database().is_err());
    }

    #[test]
    fn topics_use_the_configured_prefix_once_started() {
        let mut environment = environment();
        assert_eq!(environment.topic_for("things"), "things");

        environment.topic_prefix = environment.config.pipeline.topic_prefix.clone();
        assert_eq!(environment.topic_for("things"), "static.things");
    }

    #[test]
    fn generated_names_are_unique_identifiers() {
        let first = generate_name();

        assert!(first.starts_with("oracle_"));
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_ne!(first, generate_name());
    }
}
