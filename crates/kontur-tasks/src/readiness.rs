//! Bounded readiness polling for the image backend.

use std::time::Duration;

use kontur_pipeline::{Backend, PipelineError};
use tokio::time::Instant;

/// Backoff schedule for [`wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadinessPolicy {
    /// Delay after the first failed probe.
    pub initial_interval: Duration,
    /// Factor applied to the delay after each failed probe. Values below
    /// 1 do not shrink the delay under `initial_interval`.
    pub multiplier: f64,
    /// Upper bound on the delay between probes.
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first probe.
    pub timeout: Duration,
}

impl ReadinessPolicy {
    /// Default delay after the first failed probe.
    pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);
    /// Default growth factor between probes.
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;
    /// Default cap on the delay between probes.
    pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(1);
    /// Default time to wait before giving up.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// The delay after `current`, never shorter than `initial_interval`
    /// and never longer than `max_interval`.
    fn next_interval(&self, current: Duration) -> Duration {
        // `f64::max` also maps a NaN multiplier to 1.
        let factor = self.multiplier.max(1.0);
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(self.max_interval)
            .max(self.initial_interval)
            .min(self.max_interval)
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Self::DEFAULT_INITIAL_INTERVAL,
            multiplier: Self::DEFAULT_MULTIPLIER,
            max_interval: Self::DEFAULT_MAX_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Probe `backend` until it reports ready or `policy.timeout` elapses.
///
/// A probe is always attempted at least once, and once more at the
/// deadline.
///
/// # Errors
///
/// Returns [`PipelineError::BackendNotReady`] on timeout.
pub async fn wait_until_ready<B>(backend: &B, policy: &ReadinessPolicy) -> Result<(), PipelineError>
where
    B: Backend + ?Sized,
{
    let start = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if backend.probe() {
            tracing::debug!(
                attempts,
                elapsed_ms = start.elapsed().as_millis(),
                "backend ready"
            );
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            tracing::warn!(
                attempts,
                timeout_ms = policy.timeout.as_millis(),
                "backend did not become ready"
            );
            return Err(PipelineError::BackendNotReady);
        }
        tracing::trace!(attempts, "backend not ready, retrying");
        tokio::time::sleep(interval.min(policy.timeout - elapsed)).await;
        interval = policy.next_interval(interval);
    }
}
