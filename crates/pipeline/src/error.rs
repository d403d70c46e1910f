use ltxv_comfyui::api::ComfyUIApiError;
use ltxv_core::error::CoreError;
use ltxv_core::types::PromptId;

/// Every way a pipeline run can end without a video.
///
/// The `Display` text is what callers see in the failure result's
/// `error` field.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Carries the template path and the load failure in its message.
    #[error(transparent)]
    TemplateLoad(CoreError),

    #[error("ComfyUI server not available")]
    EngineUnavailable,

    #[error("Failed to queue prompt: {0}")]
    Submission(#[source] ComfyUIApiError),

    /// The engine reported the job failed. Never retried.
    #[error("Execution failed: {message}")]
    Execution { prompt_id: PromptId, message: String },

    #[error("Generation timed out after {timeout_secs} seconds")]
    TimedOut { prompt_id: PromptId, timeout_secs: f64 },

    #[error("No video output generated")]
    ArtifactNotFound,

    #[error("Media processing failed: {0}")]
    Media(#[source] CoreError),

    #[error("Job cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stable snake_case name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidInput(_) => "invalid_input",
            Self::TemplateLoad(_) => "template_load",
            Self::EngineUnavailable => "engine_unavailable",
            Self::Submission(_) => "submission",
            Self::Execution { .. } => "execution",
            Self::TimedOut { .. } => "timed_out",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::Media(_) => "media",
            Self::Cancelled => "cancelled",
        }
    }

    /// The engine job handle, when the failure happened after submission.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Execution { prompt_id, .. } | Self::TimedOut { prompt_id, .. } => {
                Some(prompt_id.as_str())
            }
            _ => None,
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingField(field) => Self::MissingField(field),
            CoreError::Validation(msg) => Self::InvalidInput(msg),
            CoreError::InvalidMedia { .. } => Self::InvalidInput(err.to_string()),
            CoreError::TemplateLoad { .. } => Self::TemplateLoad(err),
            CoreError::ArtifactNotFound => Self::ArtifactNotFound,
            CoreError::Ffmpeg(_) | CoreError::Io { .. } => Self::Media(err),
        }
    }
}

impl From<ComfyUIApiError> for PipelineError {
    fn from(err: ComfyUIApiError) -> Self {
        Self::Submission(err)
    }
}
