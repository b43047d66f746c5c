use std::process::ExitCode;

use clap::Parser;
use telemetry::tracing::{init_tracing, service_span};
use tracing::{Instrument, error};

use crate::core::{FormatSelection, run_oracle};

mod core;

/// Runs the CDC delivery scenarios against the pipeline described by `configuration/`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Encoding to verify: `json`, `avro` or `all`. Defaults to the configured format.
    #[arg(long)]
    format: Option<FormatSelection>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let service = env!("CARGO_BIN_NAME");
    if let Err(err) = init_tracing(service) {
        eprintln!("failed to initialize tracing: {err}");
        return ExitCode::FAILURE;
    }

    match run_oracle(args.format)
        .instrument(service_span(service))
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("oracle run failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
