//! Caller-supplied job request.
//!
//! The host hands over one JSON object per invocation. Every field except
//! `image` is optional; defaults and derived values are filled in by
//! [`crate::params`].

use serde::Deserialize;

use crate::error::CoreError;
use crate::params::GenerationMode;

/// A video generation request as received from the host runtime.
///
/// Immutable once parsed. Unknown keys are ignored so hosts can attach
/// their own bookkeeping fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequest {
    /// Base64 input image, optionally prefixed with `data:<mime>;base64,`.
    pub image: Option<String>,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Ignored when an audio track is supplied; derived from its duration.
    pub frame_count: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub fps: Option<u32>,
    /// `-1` or absent means "pick a random seed".
    pub seed: Option<i64>,
    /// Poll budget in seconds.
    pub timeout: Option<f64>,
    /// Base64 audio track. Non-empty audio selects custom-audio mode.
    pub audio: Option<String>,
    pub img_compression: Option<u32>,
    pub i2v_strength_first: Option<f64>,
    pub i2v_strength_second: Option<f64>,
    /// Explicit workflow variant; overrides selection by request shape.
    pub mode: Option<GenerationMode>,
}

impl JobRequest {
    /// Parse a request from the raw JSON `input` object.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        if !value.is_object() {
            return Err(CoreError::Validation(
                "Job input must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid job input: {e}")))
    }

    /// The image payload, if present and non-blank.
    pub fn image_payload(&self) -> Option<&str> {
        non_blank(self.image.as_deref())
    }

    /// The audio payload, if present and non-blank.
    pub fn audio_payload(&self) -> Option<&str> {
        non_blank(self.audio.as_deref())
    }

    /// The caller's prompt, if present and non-blank.
    pub fn prompt_text(&self) -> Option<&str> {
        non_blank(self.prompt.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}
