//! The structured document returned to the host for every job.

use std::error::Error;

use ltxv_core::params::GenerationMode;
use serde::Serialize;
use serde_json::Value;

use crate::error::PipelineError;

/// Success and failure share no keys, so the result serializes untagged:
/// `{video, seed, mode, parameters, elapsed_time}` or
/// `{error, traceback, elapsed_time}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Success(JobSuccess),
    Failure(JobFailure),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSuccess {
    /// Base64-encoded video bytes.
    pub video: String,
    pub seed: i64,
    pub mode: GenerationMode,
    pub parameters: Value,
    pub elapsed_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub error: String,
    pub traceback: String,
    pub elapsed_time: f64,
}

impl JobResult {
    pub fn failure(err: &PipelineError, elapsed_time: f64) -> Self {
        Self::Failure(JobFailure {
            error: err.to_string(),
            traceback: render_traceback(err),
            elapsed_time,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn elapsed_time(&self) -> f64 {
        match self {
            Self::Success(s) => s.elapsed_time,
            Self::Failure(f) => f.elapsed_time,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn render_traceback(err: &PipelineError) -> String {
    let mut out = format!("{}: {err}", err.kind());
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltxv_comfyui::api::ComfyUIApiError;
    use ltxv_core::error::CoreError;
    use serde_json::json;

    #[test]
    fn failure_shape() {
        let result = JobResult::failure(&PipelineError::EngineUnavailable, 120.5);
        assert!(!result.is_success());
        let value = result.to_value();
        assert_eq!(value["error"], "ComfyUI server not available");
        assert_eq!(value["elapsed_time"], 120.5);
        assert!(value["traceback"].as_str().unwrap().starts_with("engine_unavailable:"));
        assert!(value.get("video").is_none());
    }

    #[test]
    fn traceback_walks_source_chain() {
        let err = PipelineError::Submission(ComfyUIApiError::ApiError {
            status: 400,
            body: "bad graph".into(),
        });
        let tb = render_traceback(&err);
        let lines: Vec<&str> = tb.lines().collect();
        assert_eq!(
            lines,
            [
                "submission: Failed to queue prompt: ComfyUI API error (400): bad graph",
                "Caused by: ComfyUI API error (400): bad graph",
            ]
        );
    }

    #[test]
    fn template_failure_traceback_is_single_line() {
        let err = PipelineError::TemplateLoad(CoreError::TemplateLoad {
            path: "/workflows/workflow.json".into(),
            reason: "No such file or directory".into(),
        });
        assert_eq!(
            render_traceback(&err),
            "template_load: Failed to load workflow template /workflows/workflow.json: No such file or directory"
        );
    }

    #[test]
    fn success_shape() {
        let result = JobResult::Success(JobSuccess {
            video: "AAAA".into(),
            seed: 42,
            mode: GenerationMode::GeneratedAudio,
            parameters: json!({ "width": 720 }),
            elapsed_time: 3.0,
        });
        assert_eq!(
            result.to_value(),
            json!({
                "video": "AAAA",
                "seed": 42,
                "mode": "generated_audio",
                "parameters": { "width": 720 },
                "elapsed_time": 3.0
            })
        );
    }
}
