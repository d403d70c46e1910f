//! Bounded readiness probe for a ComfyUI instance.
//!
//! The engine may still be loading models when a job arrives, so the
//! pipeline calls [`wait_until_ready`] before submitting. The loop polls
//! `GET /system_stats` at a fixed interval until it answers 2xx, the
//! wait budget is spent, or the [`CancellationToken`] is triggered.
//! A single probe is cut off after `probe_timeout`, and neither a probe
//! nor the pause after it may run past the overall budget.

use std::time::Duration;

use ltxv_core::clock::Clock;
use tokio_util::sync::CancellationToken;

use crate::engine::ComfyUIEngine;

/// Tunable parameters for the readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Total time to keep probing.
    pub timeout: Duration,
    /// Delay between probes.
    pub interval: Duration,
    /// Longest a single probe may take.
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Probe the engine until it is ready.
///
/// Returns `true` once a probe succeeds, `false` when the budget is
/// exhausted or `cancel` fires first. Probe failures are never surfaced
/// individually.
pub async fn wait_until_ready(
    engine: &dyn ComfyUIEngine,
    config: &ReadinessConfig,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> bool {
    let start = clock.now();
    let mut attempt = 0u32;

    tracing::info!(
        timeout_secs = config.timeout.as_secs(),
        "Waiting for ComfyUI server",
    );

    let remaining = || config.timeout.saturating_sub(clock.now().saturating_sub(start));

    while !remaining().is_zero() {
        attempt += 1;
        let probe_budget = config.probe_timeout.min(remaining());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(attempt, "Readiness probe cancelled");
                return false;
            }
            result = engine.check_ready() => {
                match result {
                    Ok(()) => {
                        tracing::info!(attempt, "ComfyUI server is ready");
                        return true;
                    }
                    Err(e) => {
                        tracing::debug!(attempt, error = %e, "ComfyUI not ready yet");
                    }
                }
            }
            _ = clock.sleep(probe_budget) => {
                tracing::debug!(
                    attempt,
                    probe_timeout_ms = probe_budget.as_millis() as u64,
                    "Readiness probe timed out",
                );
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = clock.sleep(config.interval.min(remaining())) => {}
        }
    }

    tracing::error!(
        attempt,
        timeout_secs = config.timeout.as_secs(),
        "ComfyUI server did not become ready in time",
    );
    false
}
