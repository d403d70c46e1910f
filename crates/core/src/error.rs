use crate::ffmpeg::FfmpegError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to load workflow template {path}: {reason}")]
    TemplateLoad { path: String, reason: String },

    #[error("No video output generated")]
    ArtifactNotFound,

    #[error("Invalid media payload for '{field}': {reason}")]
    InvalidMedia { field: &'static str, reason: String },

    #[error("Media tool failed: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Wrap an I/O error with the path it was raised for.
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}
