use std::fmt;
use std::io::Error;

/// Name of the environment variable which contains the environment name.
const ORACLE_ENVIRONMENT_ENV_NAME: &str = "ORACLE_ENVIRONMENT";

/// The name of the local environment, used when running against a developer machine.
const LOCAL_ENV_NAME: &str = "local";

/// The name of the CI environment.
const CI_ENV_NAME: &str = "ci";

/// Represents the environment the oracle runs in.
///
/// Selects which environment-specific configuration file is layered on top of the base one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Developer machine, collaborators usually started through docker compose.
    Local,
    /// Continuous integration, collaborators usually provided by the job as services.
    Ci,
}

impl Environment {
    /// Loads the environment from the `ORACLE_ENVIRONMENT` env variable, defaulting to local.
    pub fn load() -> Result<Environment, Error> {
        std::env::var(ORACLE_ENVIRONMENT_ENV_NAME)
            .unwrap_or_else(|_| LOCAL_ENV_NAME.into())
            .try_into()
    }

    /// Returns the string name of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => LOCAL_ENV_NAME,
            Environment::Ci => CI_ENV_NAME,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    /// Attempts to create an [`Environment`] from a string, case-insensitively.
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            LOCAL_ENV_NAME => Ok(Self::Local),
            CI_ENV_NAME => Ok(Self::Ci),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use either `{LOCAL_ENV_NAME}` or `{CI_ENV_NAME}`.",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_environment_names_case_insensitively() {
        assert_eq!(
            Environment::try_from("LOCAL".to_string()).unwrap(),
            Environment::Local
        );
        assert_eq!(
            Environment::try_from("ci".to_string()).unwrap(),
            Environment::Ci
        );
        assert!(Environment::try_from("prod".to_string()).is_err());
    }

    #[test]
    fn display_matches_file_stem() {
        assert_eq!(Environment::Local.to_string(), "local");
        assert_eq!(Environment::Ci.to_string(), "ci");
    }
}
