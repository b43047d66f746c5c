use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::bail;
use crate::concurrency::clock::{Clock, deadline_after};
use crate::environment::Collaborator;
use crate::error::{ErrorKind, OracleResult};
use crate::oracle_error;

/// Timeout applied to every HTTP readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `probe` until it succeeds, a fatal error occurs or `timeout` elapses.
///
/// Errors of a fatal kind are returned immediately. Any other error is retried every `interval`;
/// once the deadline passes the last error is reported as a [`ErrorKind::StartupFailure`]. An
/// attempt still pending at the deadline is abandoned and counts as a failed attempt.
pub async fn wait_until_ready<C, P, T>(
    clock: &C,
    collaborator: Collaborator,
    timeout: Duration,
    interval: Duration,
    mut probe: P,
) -> OracleResult<T>
where
    C: Clock,
    P: AsyncFnMut() -> OracleResult<T>,
{
    let deadline = deadline_after(clock.now(), timeout);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(clock.now());
        let attempt = tokio::select! {
            biased;
            result = probe() => result,
            _ = clock.sleep(remaining) => Err(oracle_error!(
                ErrorKind::Timeout,
                "Readiness check did not answer in time",
                format!("{collaborator} check still pending after {remaining:?}")
            )),
        };

        let err = match attempt {
            Ok(ready) => {
                info!(%collaborator, attempts, "collaborator is ready");
                return Ok(ready);
            }
            Err(err) if err.kind().is_fatal() => return Err(err),
            Err(err) => err,
        };

        let now = clock.now();
        if now >= deadline {
            bail!(
                ErrorKind::StartupFailure,
                "Collaborator did not become ready in time",
                detail = format!(
                    "{collaborator} not ready after {timeout:?} ({attempts} attempts), last error: {err}"
                ),
                source: err
            );
        }

        debug!(%collaborator, attempts, error = %err, "collaborator not ready yet");
        clock.sleep(interval.min(deadline - now)).await;
    }
}

/// Probes HTTP services with `GET` requests.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Succeeds if `url` answers with a success status.
    ///
    /// Failures are reported with `kind`, which is never fatal, so callers keep retrying.
    pub async fn get(&self, url: &str, kind: ErrorKind) -> OracleResult<()> {
        let response = self.client.get(url).send().await.map_err(|err| {
            oracle_error!(
                kind,
                "Readiness probe request failed",
                format!("GET {url}: {err}"),
                source: err
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                kind,
                "Readiness probe returned an error status",
                format!("GET {url}: status {status}")
            );
        }

        Ok(())
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::clock::ManualClock;

    #[tokio::test]
    async fn retries_until_the_probe_succeeds() {
        let clock = ManualClock::new();
        let mut failures = 2;

        let ready = wait_until_ready(
            &clock,
            Collaborator::Bus,
            Duration::from_secs(10),
            Duration::from_secs(1),
            async || {
                if failures > 0 {
                    failures -= 1;
                    bail!(ErrorKind::BusError, "Proxy not reachable");
                }
                Ok("ready")
            },
        )
        .await
        .unwrap();

        assert_eq!(ready, "ready");
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn expiry_reports_the_last_error() {
        let clock = ManualClock::new();

        let error = wait_until_ready(
            &clock,
            Collaborator::SchemaRegistry,
            Duration::from_secs(3),
            Duration::from_secs(2),
            async || -> OracleResult<()> {
                bail!(ErrorKind::RegistryError, "Registry not reachable", "connection refused")
            },
        )
        .await
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::StartupFailure);
        let detail = error.detail().unwrap();
        assert!(detail.contains("schema registry not ready after 3s (3 attempts)"));
        assert!(detail.contains("connection refused"));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn hanging_checks_are_bounded_by_the_startup_timeout() {
        let clock = ManualClock::new();

        let error = wait_until_ready(
            &clock,
            Collaborator::Database,
            Duration::from_secs(3),
            Duration::from_secs(1),
            async || -> OracleResult<()> { std::future::pending().await },
        )
        .await
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::StartupFailure);
        let detail = error.detail().unwrap();
        assert!(detail.starts_with("database not ready after 3s (1 attempts)"));
        assert!(detail.contains("check still pending"));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unbounded_timeouts_keep_retrying() {
        let clock = ManualClock::new();
        let mut failures = 1;

        wait_until_ready(
            &clock,
            Collaborator::Bus,
            Duration::MAX,
            Duration::from_secs(1),
            async || {
                if failures > 0 {
                    failures -= 1;
                    bail!(ErrorKind::BusError, "Proxy not reachable");
                }
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let clock = ManualClock::new();
        let mut attempts = 0;

        let error = wait_until_ready(
            &clock,
            Collaborator::Pipeline,
            Duration::from_secs(10),
            Duration::from_secs(1),
            async || -> OracleResult<()> {
                attempts += 1;
                bail!(ErrorKind::StartupFailure, "Collaborator process exited")
            },
        )
        .await
        .unwrap_err();

        assert_eq!(error.description(), "Collaborator process exited");
        assert_eq!(attempts, 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
