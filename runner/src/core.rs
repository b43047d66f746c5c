use std::str::FromStr;

use config::load_config;
use config::shared::HarnessConfig;
use oracle::EncodingFormat;
use oracle::bus::MessageBus;
use oracle::environment::TestEnvironment;
use oracle::scenario::ScenarioReport;
use tracing::{error, info, warn};

/// Formats selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelection {
    One(EncodingFormat),
    All,
}

impl FormatSelection {
    fn formats(self) -> Vec<EncodingFormat> {
        match self {
            FormatSelection::One(format) => vec![format],
            FormatSelection::All => vec![EncodingFormat::Json, EncodingFormat::Avro],
        }
    }
}

impl FromStr for FormatSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(FormatSelection::All);
        }

        EncodingFormat::from_str(s).map(FormatSelection::One)
    }
}

/// Runs one scenario group per selected format, each against a fresh environment.
pub async fn run_oracle(selection: Option<FormatSelection>) -> anyhow::Result<()> {
    let config = load_config::<HarnessConfig>()?;
    let selection = selection.unwrap_or(FormatSelection::One(config.format));

    let mut failed = Vec::new();
    for format in selection.formats() {
        let report = run_group(config.clone(), format).await?;
        info!("{report}");

        if !report.is_success() {
            failed.push(format);
        }
    }

    if !failed.is_empty() {
        let failed: Vec<String> = failed.iter().map(ToString::to_string).collect();
        anyhow::bail!("scenarios failed for: {}", failed.join(", "));
    }

    Ok(())
}

/// Starts an environment for `format`, runs every scenario and stops the environment.
///
/// Startup failures abort the group and are returned; scenario failures end up in the report.
async fn run_group(config: HarnessConfig, format: EncodingFormat) -> anyhow::Result<ScenarioReport> {
    let mut environment = TestEnvironment::new(config);
    environment.configure(format)?;

    if let Err(err) = environment.start().await {
        error!(%format, error = %err, "environment failed to start");
        return Err(err.into());
    }

    let report = match environment.scenario_runner() {
        Ok(mut runner) => {
            let report = runner.run_all().await;
            if let Err(err) = runner.into_collector().into_bus().close().await {
                warn!(%format, error = %err, "failed to close bus consumers");
            }

            Ok(report)
        }
        Err(err) => Err(err),
    };

    environment.stop().await;

    Ok(report?)
}
