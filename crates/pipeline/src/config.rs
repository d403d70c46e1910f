use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ltxv_comfyui::readiness::ReadinessConfig;
use ltxv_core::params::{self, DEFAULT_TIMEOUT_SECS};

use crate::poller::PollerConfig;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults matching the standard worker container
/// layout (ComfyUI on localhost, models under `/comfyui`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the ComfyUI HTTP API.
    pub comfyui_url: String,
    /// Directory ComfyUI loads input images and audio from.
    pub input_dir: PathBuf,
    /// Directory ComfyUI writes generated media into.
    pub output_dir: PathBuf,
    /// Directory holding the per-mode workflow templates.
    pub workflow_dir: PathBuf,
    pub readiness: ReadinessConfig,
    pub poller: PollerConfig,
    /// Timeout applied when a job does not specify one.
    pub default_timeout: Duration,
    /// Remove the prompt from the engine when the local wait is abandoned.
    pub cancel_on_timeout: bool,
    /// Per-request HTTP timeout for ComfyUI calls.
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `COMFYUI_URL`             | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_ROOT`            | `/comfyui`               |
    /// | `WORKFLOW_DIR`            | `/workflows`             |
    /// | `READINESS_TIMEOUT_SECS`  | `120`                    |
    /// | `READINESS_INTERVAL_SECS` | `2`                      |
    /// | `READINESS_PROBE_TIMEOUT_SECS` | `5`                 |
    /// | `POLL_INTERVAL_MS`        | `1000`                   |
    /// | `PROGRESS_INTERVAL_SECS`  | `10`                     |
    /// | `DEFAULT_TIMEOUT_SECS`    | `600`                    |
    /// | `CANCEL_ON_TIMEOUT`       | `true`                   |
    /// | `HTTP_TIMEOUT_SECS`       | `30`                     |
    ///
    /// Input and output directories are `<COMFYUI_ROOT>/input` and
    /// `<COMFYUI_ROOT>/output`. Unparseable values fall back to the
    /// default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let comfyui_url = lookup("COMFYUI_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "http://127.0.0.1:8188".into());

        let comfyui_root = PathBuf::from(
            lookup("COMFYUI_ROOT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "/comfyui".into()),
        );

        let workflow_dir = PathBuf::from(
            lookup("WORKFLOW_DIR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "/workflows".into()),
        );

        let readiness = ReadinessConfig {
            timeout: Duration::from_secs(parse_or(&lookup, "READINESS_TIMEOUT_SECS", 120u64)),
            interval: Duration::from_secs(parse_or(&lookup, "READINESS_INTERVAL_SECS", 2u64)),
            probe_timeout: Duration::from_secs(
                parse_or(&lookup, "READINESS_PROBE_TIMEOUT_SECS", 5u64).max(1),
            ),
        };

        let poller = PollerConfig {
            interval: Duration::from_millis(parse_or(&lookup, "POLL_INTERVAL_MS", 1000u64).max(1)),
            progress_interval: Duration::from_secs(
                parse_or(&lookup, "PROGRESS_INTERVAL_SECS", 10u64).max(1),
            ),
        };

        let default_timeout_secs = parse_or(&lookup, "DEFAULT_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let default_timeout = params::timeout_duration(default_timeout_secs).unwrap_or_else(|e| {
            tracing::warn!(
                value = default_timeout_secs,
                error = %e,
                "Invalid DEFAULT_TIMEOUT_SECS; using default",
            );
            Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)
        });

        let cancel_on_timeout = match lookup("CANCEL_ON_TIMEOUT") {
            None => true,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Invalid CANCEL_ON_TIMEOUT; using default");
                true
            }),
        };

        let http_timeout = Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30u64).max(1));

        Self {
            comfyui_url,
            input_dir: comfyui_root.join("input"),
            output_dir: comfyui_root.join("output"),
            workflow_dir,
            readiness,
            poller,
            default_timeout,
            cancel_on_timeout,
            http_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value; using default");
            default
        }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> PipelineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(c.input_dir, PathBuf::from("/comfyui/input"));
        assert_eq!(c.output_dir, PathBuf::from("/comfyui/output"));
        assert_eq!(c.workflow_dir, PathBuf::from("/workflows"));
        assert_eq!(c.readiness.timeout, Duration::from_secs(120));
        assert_eq!(c.readiness.interval, Duration::from_secs(2));
        assert_eq!(c.readiness.probe_timeout, Duration::from_secs(5));
        assert_eq!(c.poller.interval, Duration::from_secs(1));
        assert_eq!(c.poller.progress_interval, Duration::from_secs(10));
        assert_eq!(c.default_timeout, Duration::from_secs(600));
        assert!(c.cancel_on_timeout);
        assert_eq!(c.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("COMFYUI_URL", "http://gpu-1:8190"),
            ("COMFYUI_ROOT", "/srv/comfy"),
            ("POLL_INTERVAL_MS", "250"),
            ("DEFAULT_TIMEOUT_SECS", "90.5"),
            ("CANCEL_ON_TIMEOUT", "off"),
        ]);
        assert_eq!(c.comfyui_url, "http://gpu-1:8190");
        assert_eq!(c.output_dir, PathBuf::from("/srv/comfy/output"));
        assert_eq!(c.poller.interval, Duration::from_millis(250));
        assert_eq!(c.default_timeout, Duration::from_secs_f64(90.5));
        assert!(!c.cancel_on_timeout);
    }

    #[test]
    fn invalid_values_fall_back() {
        let c = config(&[
            ("READINESS_TIMEOUT_SECS", "soon"),
            ("DEFAULT_TIMEOUT_SECS", "-5"),
            ("CANCEL_ON_TIMEOUT", "maybe"),
        ]);
        assert_eq!(c.readiness.timeout, Duration::from_secs(120));
        assert_eq!(c.default_timeout, Duration::from_secs(600));
        assert!(c.cancel_on_timeout);
    }

    #[test]
    fn oversized_default_timeout_falls_back() {
        for raw in ["1e30", "inf", "100000"] {
            let c = config(&[("DEFAULT_TIMEOUT_SECS", raw)]);
            assert_eq!(c.default_timeout, Duration::from_secs(600), "value {raw}");
        }
    }
}
