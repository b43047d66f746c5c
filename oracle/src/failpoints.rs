use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, OracleResult};

pub const START_DATABASE: &str = "environment.start_database";
pub const START_BUS: &str = "environment.start_bus";
pub const START_SCHEMA_REGISTRY: &str = "environment.start_schema_registry";
pub const START_PIPELINE: &str = "environment.start_pipeline";

pub fn oracle_fail_point(name: &str) -> OracleResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::StartupFailure;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "startup" => ErrorKind::StartupFailure,
                "io" => ErrorKind::IoError,
                _ => ErrorKind::StartupFailure,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
