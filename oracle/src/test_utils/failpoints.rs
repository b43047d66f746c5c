use fail::FailScenario;

/// Enables failpoints for the lifetime of the guard.
///
/// Every configured failpoint is switched off again when the guard is dropped, so tests sharing a
/// process do not leak failures into each other.
pub struct FailpointGuard<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> FailpointGuard<'a> {
    /// Configures each `(failpoint, action)` pair, e.g. `("environment.start_bus", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> FailpointGuard<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(failpoint, _)| failpoint.to_string())
                .collect(),
        }
    }
}

impl Drop for FailpointGuard<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}
