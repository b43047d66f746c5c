use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{Environment as EnvironmentSource, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory looked up under the current directory by [`load_config`].
const CONFIGURATION_DIR: &str = "configuration";

const FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Stem of the file every environment layers its own file on top of.
const BASE_STEM: &str = "base";

/// Overrides look like `ORACLE_COLLECTOR__TIMEOUT_MS=5000`.
const ENV_PREFIX: &str = "ORACLE";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Configuration that can be assembled by [`load_config`].
pub trait Config {
    /// Keys whose environment overrides are comma-separated lists, e.g. `pipeline.args`.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{}` does not exist", .0.display())]
    MissingDirectory(PathBuf),

    /// Neither of the supported extensions exists for a layer.
    #[error("no {layer} configuration in `{}`, tried {tried}", directory.display())]
    MissingFile {
        layer: String,
        directory: PathBuf,
        tried: String,
    },

    #[error("`{}` is not a valid configuration file: {source}", path.display())]
    InvalidFile {
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("invalid ORACLE_ENVIRONMENT: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to apply ORACLE_ overrides: {0}")]
    Overrides(#[source] rust_cli_config::ConfigError),

    #[error("configuration does not describe a valid harness: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from `configuration/` under the current directory.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(current_dir.join(CONFIGURATION_DIR))
}

/// Loads `T` from `directory`.
///
/// `base.*` is read first, then the file of the environment selected by `ORACLE_ENVIRONMENT`
/// (`local` or `ci`), then `ORACLE_`-prefixed environment variables. Later layers win.
pub fn load_config_from<T>(directory: impl AsRef<Path>) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = directory.as_ref();
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let environment = Environment::load()?;

    let mut builder = rust_cli_config::Config::builder();
    for layer in [BASE_STEM, environment.as_str()] {
        let path = locate_layer(directory, layer)?;
        check_file(&path)?;
        builder = builder.add_source(File::from(path));
    }

    builder
        .add_source(overrides::<T>())
        .build()
        .map_err(LoadConfigError::Overrides)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn overrides<T: Config>() -> EnvironmentSource {
    let source = EnvironmentSource::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}

fn locate_layer(directory: &Path, layer: &str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{layer}.{extension}")))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let tried = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::MissingFile {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        tried,
    })
}

/// Parses `path` on its own so a syntax error names the offending file.
fn check_file(path: &Path) -> Result<(), LoadConfigError> {
    rust_cli_config::Config::builder()
        .add_source(File::from(path))
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::InvalidFile {
            path: path.to_path_buf(),
            source,
        })
}
