//! Poll-to-completion state machine for one queued prompt.
//!
//! ```text
//!            history: outputs          +-----------+
//!        +------------------------->   | Completed |
//!        |                             +-----------+
//!  +---------+  history: error status  +--------+
//!  | Waiting | ----------------------> | Failed |
//!  +---------+                         +--------+
//!     |   ^ transient query failure / still running
//!     |   +--------- (sleep one tick) ---------+
//!     |  elapsed >= timeout                    +----------+
//!     +--------------------------------------> | TimedOut |
//!                                              +----------+
//! ```
//!
//! Time comes from a [`Clock`] so tests can drive the loop through
//! minutes of simulated time; a [`CancellationToken`] aborts the wait.

use std::time::Duration;

use ltxv_comfyui::engine::ComfyUIEngine;
use ltxv_comfyui::events::JobEvent;
use ltxv_comfyui::history::{self, HistoryState};
use ltxv_core::clock::Clock;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Tick and progress cadence for the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between history queries.
    pub interval: Duration,
    /// Elapsed-time spacing of progress events.
    pub progress_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Terminal result of waiting on a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Outputs keyed by node ID (possibly empty).
    Outputs(Map<String, Value>),
    /// The engine reported the execution failed.
    ExecutionError(String),
    TimedOut,
    Cancelled,
}

/// Emits a progress tick at most once per interval boundary.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    interval: Duration,
    next: Duration,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: interval,
        }
    }

    /// Whole seconds elapsed if a new boundary has been crossed.
    ///
    /// Skipped boundaries (a slow tick spanning several) collapse into
    /// one report.
    pub fn crossed(&mut self, elapsed: Duration) -> Option<u64> {
        if self.interval.is_zero() || elapsed < self.next {
            return None;
        }
        let boundaries = elapsed.as_nanos() / self.interval.as_nanos();
        let next_nanos = (boundaries + 1) * self.interval.as_nanos();
        self.next = Duration::from_nanos(u64::try_from(next_nanos).unwrap_or(u64::MAX));
        Some(elapsed.as_secs())
    }
}

/// Waits for one prompt to reach a terminal state.
pub struct CompletionPoller<'a> {
    engine: &'a dyn ComfyUIEngine,
    clock: &'a dyn Clock,
    config: PollerConfig,
    events: &'a broadcast::Sender<JobEvent>,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(
        engine: &'a dyn ComfyUIEngine,
        clock: &'a dyn Clock,
        config: PollerConfig,
        events: &'a broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            engine,
            clock,
            config,
            events,
        }
    }

    /// Poll `GET /history/{prompt_id}` until completion, failure,
    /// `timeout` or cancellation.
    ///
    /// Query failures and malformed entries are retried on the next tick.
    /// An engine-reported error returns immediately.
    pub async fn wait(
        &self,
        prompt_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let start = self.clock.now();
        let mut progress = ProgressTracker::new(self.config.progress_interval);

        tracing::info!(
            prompt_id,
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for completion",
        );

        loop {
            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= timeout {
                tracing::error!(
                    prompt_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Generation timed out",
                );
                return ExecutionOutcome::TimedOut;
            }

            let query = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(prompt_id),
                result = self.engine.get_history(prompt_id) => result,
            };

            match query {
                Ok(raw) => match history::classify(&raw, prompt_id) {
                    Ok(HistoryState::Completed(outputs)) => {
                        let elapsed = self.clock.now().saturating_sub(start);
                        tracing::info!(
                            prompt_id,
                            elapsed_secs = elapsed.as_secs_f64(),
                            output_nodes = outputs.len(),
                            "Generation completed",
                        );
                        return ExecutionOutcome::Outputs(outputs);
                    }
                    Ok(HistoryState::Failed(message)) => {
                        tracing::error!(prompt_id, error = %message, "Execution failed");
                        return ExecutionOutcome::ExecutionError(message);
                    }
                    Ok(HistoryState::Pending) => {}
                    Err(e) => {
                        tracing::debug!(prompt_id, error = %e, "Malformed history entry");
                    }
                },
                Err(e) => {
                    tracing::debug!(prompt_id, error = %e, "Status check error");
                }
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if let Some(elapsed_secs) = progress.crossed(elapsed) {
                tracing::info!(prompt_id, elapsed_secs, "Progress: still generating");
                let _ = self.events.send(JobEvent::Progress {
                    prompt_id: prompt_id.to_string(),
                    elapsed_secs,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(prompt_id),
                _ = self.clock.sleep(self.config.interval) => {}
            }
        }
    }

    fn cancelled(&self, prompt_id: &str) -> ExecutionOutcome {
        tracing::warn!(prompt_id, "Completion wait cancelled");
        ExecutionOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_once_per_boundary() {
        let mut t = ProgressTracker::new(Duration::from_secs(10));
        assert_eq!(t.crossed(Duration::from_secs(0)), None);
        assert_eq!(t.crossed(Duration::from_secs(9)), None);
        assert_eq!(t.crossed(Duration::from_secs(10)), Some(10));
        assert_eq!(t.crossed(Duration::from_millis(10_500)), None);
        assert_eq!(t.crossed(Duration::from_secs(19)), None);
        assert_eq!(t.crossed(Duration::from_secs(20)), Some(20));
    }

    #[test]
    fn skipped_boundaries_collapse() {
        let mut t = ProgressTracker::new(Duration::from_secs(10));
        assert_eq!(t.crossed(Duration::from_secs(35)), Some(35));
        assert_eq!(t.crossed(Duration::from_secs(39)), None);
        assert_eq!(t.crossed(Duration::from_secs(40)), Some(40));
    }
}
