use std::process::{ExitStatus, Stdio};

use config::shared::{BusConfig, CommandConfig, PgConnectionConfig, PipelineConfig};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::EncodingFormat;
use crate::bail;
use crate::environment::Collaborator;
use crate::error::{ErrorKind, OracleResult};
use crate::oracle_error;

/// A child process started by the environment.
///
/// The process is killed when the handle is dropped, so an environment that is never stopped
/// does not leak processes.
#[derive(Debug)]
pub struct ManagedProcess {
    collaborator: Collaborator,
    program: String,
    child: Child,
}

impl ManagedProcess {
    /// Spawns `command` on behalf of `collaborator`.
    pub fn spawn(collaborator: Collaborator, command: &CommandConfig) -> OracleResult<Self> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                oracle_error!(
                    ErrorKind::StartupFailure,
                    "Failed to spawn a collaborator process",
                    format!("{collaborator}: '{}': {err}", command.program),
                    source: err
                )
            })?;

        info!(%collaborator, program = %command.program, pid = ?child.id(), "spawned process");

        Ok(Self {
            collaborator,
            program: command.program.clone(),
            child,
        })
    }

    pub fn collaborator(&self) -> Collaborator {
        self.collaborator
    }

    /// Returns the exit status if the process has exited, without waiting for it.
    pub fn exit_status(&mut self) -> OracleResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Fails with a fatal [`ErrorKind::StartupFailure`] if the process is no longer running.
    pub fn ensure_running(&mut self) -> OracleResult<()> {
        if let Some(status) = self.exit_status()? {
            bail!(
                ErrorKind::StartupFailure,
                "Collaborator process exited",
                format!(
                    "{} process '{}' exited with {status}",
                    self.collaborator, self.program
                )
            );
        }

        Ok(())
    }

    /// Fails with a fatal [`ErrorKind::StartupFailure`] if the process exited unsuccessfully.
    ///
    /// Start commands that daemonize, like `docker compose up -d`, exit successfully right away.
    pub fn ensure_not_failed(&mut self) -> OracleResult<()> {
        if let Some(status) = self.exit_status()?
            && !status.success()
        {
            bail!(
                ErrorKind::StartupFailure,
                "Collaborator start command failed",
                format!(
                    "{} command '{}' exited with {status}",
                    self.collaborator, self.program
                )
            );
        }

        Ok(())
    }

    /// Kills the process unless it already exited, and waits for it.
    pub async fn terminate(mut self) -> OracleResult<()> {
        if self.exit_status()?.is_some() {
            debug!(collaborator = %self.collaborator, "process already exited");
            return Ok(());
        }

        self.child.kill().await?;
        info!(collaborator = %self.collaborator, program = %self.program, "terminated process");

        Ok(())
    }
}

/// Runs `command` to completion, failing if it exits unsuccessfully.
pub async fn run_command(collaborator: Collaborator, command: &CommandConfig) -> OracleResult<()> {
    debug!(%collaborator, program = %command.program, "running command");

    let status = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        bail!(
            ErrorKind::IoError,
            "Collaborator command failed",
            format!(
                "{collaborator} command '{}' exited with {status}",
                command.program
            )
        );
    }

    Ok(())
}

/// Builds the command line of the pipeline process for one scenario group.
///
/// The configured arguments come first, followed by the settings derived from the group.
pub fn pipeline_command(
    config: &PipelineConfig,
    format: EncodingFormat,
    database: &PgConnectionConfig,
    bus: &BusConfig,
    topic_prefix: Option<&str>,
    registry_url: Option<&str>,
) -> CommandConfig {
    let mut args = config.args.clone();
    args.push(format!("--output-format={format}"));
    args.push(format!("--postgres={}", database.to_connection_string()));
    args.push(format!("--broker={}", bus.brokers));
    args.push(format!("--slot={}", config.slot_name));

    if let Some(prefix) = topic_prefix {
        args.push(format!("--topic-prefix={prefix}"));
    }

    if format == EncodingFormat::Avro
        && let Some(url) = registry_url
    {
        args.push(format!("--schema-registry={url}"));
    }

    CommandConfig {
        program: config.program.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use config::shared::ServiceConfig;

    use super::*;

    fn pipeline() -> PipelineConfig {
        PipelineConfig {
            program: "bottledwater".to_string(),
            args: vec!["--allow-unkeyed".to_string()],
            slot_name: "oracle".to_string(),
            topic_prefix: None,
            unique_topic_prefix: false,
        }
    }

    fn database() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "oracle_1".to_string(),
            username: "postgres".to_string(),
            password: None,
            ephemeral: true,
            service: ServiceConfig::default(),
        }
    }

    fn bus() -> BusConfig {
        BusConfig {
            brokers: "localhost:9092".to_string(),
            rest_proxy_url: "http://localhost:8082".to_string(),
            consumer_group: "cdc-oracle".to_string(),
            service: ServiceConfig::default(),
        }
    }

    #[test]
    fn json_pipelines_get_no_registry() {
        let command = pipeline_command(
            &pipeline(),
            EncodingFormat::Json,
            &database(),
            &bus(),
            None,
            Some("http://localhost:8081"),
        );

        assert_eq!(command.program, "bottledwater");
        assert_eq!(
            command.args,
            vec![
                "--allow-unkeyed".to_string(),
                "--output-format=json".to_string(),
                "--postgres=host='localhost' port=5432 dbname='oracle_1' user='postgres'"
                    .to_string(),
                "--broker=localhost:9092".to_string(),
                "--slot=oracle".to_string(),
            ]
        );
    }

    #[test]
    fn avro_pipelines_get_the_registry_and_prefix() {
        let command = pipeline_command(
            &pipeline(),
            EncodingFormat::Avro,
            &database(),
            &bus(),
            Some("oracle_abc"),
            Some("http://localhost:8081"),
        );

        assert_eq!(
            &command.args[5..],
            &[
                "--topic-prefix=oracle_abc".to_string(),
                "--schema-registry=http://localhost:8081".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn failing_commands_are_reported() {
        let command = CommandConfig {
            program: "false".to_string(),
            args: vec![],
        };

        let error = run_command(Collaborator::Bus, &command).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::IoError);
        assert!(error.detail().unwrap().contains("bus command 'false'"));
    }

    #[tokio::test]
    async fn missing_programs_fail_to_spawn() {
        let command = CommandConfig {
            program: "oracle-no-such-program".to_string(),
            args: vec![],
        };

        let error = ManagedProcess::spawn(Collaborator::Pipeline, &command).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::StartupFailure);
    }
}
