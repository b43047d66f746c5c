use std::fmt;
use std::time::Duration;

use crate::EncodingFormat;
use crate::error::{OracleError, OracleResult};
use crate::scenario::Scenario;

/// Result of running one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub result: OracleResult<()>,
    pub elapsed: Duration,
}

impl ScenarioOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcomes of a scenario group, in execution order.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    format: EncodingFormat,
    outcomes: Vec<ScenarioOutcome>,
}

impl ScenarioReport {
    pub fn new(format: EncodingFormat) -> Self {
        Self {
            format,
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ScenarioOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn format(&self) -> EncodingFormat {
        self.format
    }

    pub fn outcomes(&self) -> &[ScenarioOutcome] {
        &self.outcomes
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ScenarioOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Returns the errors of all failed scenarios, aggregated into a single error.
    pub fn into_result(self) -> OracleResult<()> {
        let errors: Vec<OracleError> = self
            .outcomes
            .into_iter()
            .filter_map(|outcome| outcome.result.err())
            .collect();

        if errors.is_empty() {
            return Ok(());
        }

        Err(errors.into())
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passed = self.outcomes.len() - self.failures().count();
        write!(
            f,
            "{}: {passed}/{} scenarios passed",
            self.format,
            self.outcomes.len()
        )?;

        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(()) => write!(
                    f,
                    "\n  ok     {} ({:?})",
                    outcome.scenario.name(),
                    outcome.elapsed
                )?,
                Err(error) => {
                    write!(
                        f,
                        "\n  FAILED {} ({:?})",
                        outcome.scenario.name(),
                        outcome.elapsed
                    )?;
                    for line in error.to_string().lines() {
                        write!(f, "\n         {line}")?;
                    }
                }
            }
        }

        Ok(())
    }
}
