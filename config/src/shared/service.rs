use serde::Deserialize;

/// A command line used to start or stop a collaborator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandConfig {
    /// Program to execute, resolved through `PATH`.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

/// How the environment manages one collaborator.
///
/// A collaborator without a `start` command is assumed to be managed externally: the
/// environment only waits for it to become ready and never tries to stop it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Command that brings the collaborator up, for example `docker compose up -d kafka`.
    #[serde(default)]
    pub start: Option<CommandConfig>,
    /// Command that tears the collaborator down.
    #[serde(default)]
    pub stop: Option<CommandConfig>,
}

impl ServiceConfig {
    /// Returns `true` if the environment is responsible for starting this collaborator.
    pub fn is_managed(&self) -> bool {
        self.start.is_some()
    }
}
