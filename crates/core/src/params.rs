//! Parameter resolution: defaults, mode selection, seeds and derived
//! frame counts.
//!
//! [`resolve_parameters`] is the only place a [`ResolvedParameters`] is
//! built. Everything downstream (binder, poller, result echo) reads it
//! and never writes it back.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::request::JobRequest;

// ---------------------------------------------------------------------------
// Defaults (match the shipped workflow templates)
// ---------------------------------------------------------------------------

pub const DEFAULT_WIDTH: u32 = 720;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FRAME_COUNT: u32 = 97;
pub const DEFAULT_STEPS: u32 = 20;
pub const DEFAULT_CFG: f64 = 4.0;
pub const DEFAULT_FPS: u32 = 25;
pub const DEFAULT_TIMEOUT_SECS: f64 = 600.0;
/// JPEG-style degradation applied to the conditioning image (0 = off).
pub const DEFAULT_IMG_COMPRESSION: u32 = 35;
pub const DEFAULT_I2V_STRENGTH_FIRST: f64 = 1.0;
pub const DEFAULT_I2V_STRENGTH_SECOND: f64 = 1.0;

/// Seed value meaning "generate one for me".
pub const RANDOM_SEED_SENTINEL: i64 = -1;

/// Upper bound for `img_compression`.
pub const MAX_IMG_COMPRESSION: u32 = 100;

// Upper bounds for caller-supplied sizes. Anything larger is rejected
// before it reaches the binder or the frame-count arithmetic.
pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_STEPS: u32 = 1000;
pub const MAX_FPS: u32 = 240;
pub const MAX_FRAME_COUNT: u32 = 10_000;
/// Longest accepted job timeout (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

pub const DEFAULT_PROMPT: &str = "A 3D animated scene in a cozy library. The elderly tortoise and young fox sit together in comfortable silence. The tortoise blinks slowly and breathes gently. The fox's ears twitch slightly, tail sways softly. No talking, no dialogue, both mouths stay closed. Warm firelight flickers in the background. The camera remains static.";

pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "blurry, low quality, still frame, frames, watermark, overlay, titles, has blurbox, has subtitles";

// ---------------------------------------------------------------------------
// Generation mode
// ---------------------------------------------------------------------------

/// Workflow variant. Each mode has its own template and binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Two-stage video with a soundtrack generated by the model.
    GeneratedAudio,
    /// Two-stage video conditioned on a caller-supplied audio track.
    CustomAudio,
    /// Original single-template layout with a built-in default prompt.
    Legacy,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 3] = [
        GenerationMode::GeneratedAudio,
        GenerationMode::CustomAudio,
        GenerationMode::Legacy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::GeneratedAudio => "generated_audio",
            GenerationMode::CustomAudio => "custom_audio",
            GenerationMode::Legacy => "legacy",
        }
    }

    /// File name of this mode's template inside the workflow directory.
    pub fn template_filename(self) -> &'static str {
        match self {
            GenerationMode::GeneratedAudio => "workflow_generated_audio.json",
            GenerationMode::CustomAudio => "workflow_custom_audio.json",
            GenerationMode::Legacy => "workflow.json",
        }
    }

    /// Whether the caller must supply a prompt (no built-in default).
    pub fn requires_prompt(self) -> bool {
        !matches!(self, GenerationMode::Legacy)
    }

    /// Largest seed this mode's noise nodes accept.
    pub fn max_seed(self) -> i64 {
        match self {
            GenerationMode::Legacy => u32::MAX as i64,
            GenerationMode::GeneratedAudio | GenerationMode::CustomAudio => i32::MAX as i64,
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the workflow variant from the request shape.
///
/// An explicit `mode` wins. Otherwise a non-empty audio payload selects
/// [`GenerationMode::CustomAudio`] and everything else
/// [`GenerationMode::GeneratedAudio`].
pub fn select_mode(request: &JobRequest) -> GenerationMode {
    match request.mode {
        Some(mode) => mode,
        None if request.audio_payload().is_some() => GenerationMode::CustomAudio,
        None => GenerationMode::GeneratedAudio,
    }
}

/// Check the fields a mode cannot run without.
///
/// Runs before any file is written or the engine is contacted.
pub fn validate_required(request: &JobRequest, mode: GenerationMode) -> Result<(), CoreError> {
    if request.image_payload().is_none() {
        return Err(CoreError::MissingField("image"));
    }
    if mode.requires_prompt() && request.prompt_text().is_none() {
        return Err(CoreError::MissingField("prompt"));
    }
    if mode == GenerationMode::CustomAudio && request.audio_payload().is_none() {
        return Err(CoreError::MissingField("audio"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

/// Fully defaulted, validated parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParameters {
    pub mode: GenerationMode,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub steps: u32,
    pub cfg: f64,
    pub fps: u32,
    /// Stage-one noise seed. Stage two uses [`Self::stage_two_seed`].
    pub seed: i64,
    /// `true` when the seed was generated rather than supplied.
    pub seed_generated: bool,
    #[serde(skip)]
    pub timeout: Duration,
    pub img_compression: u32,
    pub i2v_strength_first: f64,
    pub i2v_strength_second: f64,
    /// Length of the custom audio track in seconds (custom-audio mode only).
    pub audio_duration: Option<f64>,
}

impl ResolvedParameters {
    /// Seed for the refinement stage, offset so the stages decorrelate
    /// while staying reproducible from one value.
    pub fn stage_two_seed(&self) -> i64 {
        self.seed + 1
    }

    /// The values echoed back to the caller in the job result.
    pub fn echo(&self) -> serde_json::Value {
        let mut echo = serde_json::json!({
            "prompt": self.prompt,
            "negative_prompt": self.negative_prompt,
            "width": self.width,
            "height": self.height,
            "frame_count": self.frame_count,
            "steps": self.steps,
            "cfg": self.cfg,
            "fps": self.fps,
            "img_compression": self.img_compression,
            "i2v_strength_first": self.i2v_strength_first,
            "i2v_strength_second": self.i2v_strength_second,
        });
        if let (Some(duration), Some(obj)) = (self.audio_duration, echo.as_object_mut()) {
            obj.insert("audio_duration".to_string(), serde_json::json!(duration));
        }
        echo
    }
}

/// Resolve a request into concrete parameters using the thread RNG for
/// seed generation.
///
/// `audio_duration` must be the probed length of the custom audio track
/// in custom-audio mode and is ignored otherwise.
pub fn resolve_parameters(
    request: &JobRequest,
    mode: GenerationMode,
    audio_duration: Option<f64>,
) -> Result<ResolvedParameters, CoreError> {
    resolve_parameters_with_rng(request, mode, audio_duration, &mut rand::rng())
}

/// Same as [`resolve_parameters`] with a caller-provided RNG.
pub fn resolve_parameters_with_rng<R: Rng>(
    request: &JobRequest,
    mode: GenerationMode,
    audio_duration: Option<f64>,
    rng: &mut R,
) -> Result<ResolvedParameters, CoreError> {
    validate_required(request, mode)?;

    let width = bounded("width", request.width, DEFAULT_WIDTH, MAX_DIMENSION)?;
    let height = bounded("height", request.height, DEFAULT_HEIGHT, MAX_DIMENSION)?;
    let steps = bounded("steps", request.steps, DEFAULT_STEPS, MAX_STEPS)?;
    let fps = bounded("fps", request.fps, DEFAULT_FPS, MAX_FPS)?;

    let cfg = request.cfg.unwrap_or(DEFAULT_CFG);
    if !cfg.is_finite() || cfg < 0.0 {
        return Err(CoreError::Validation(format!(
            "cfg must be a non-negative number, got {cfg}"
        )));
    }

    let img_compression = request.img_compression.unwrap_or(DEFAULT_IMG_COMPRESSION);
    if img_compression > MAX_IMG_COMPRESSION {
        return Err(CoreError::Validation(format!(
            "img_compression must be at most {MAX_IMG_COMPRESSION}, got {img_compression}"
        )));
    }

    let i2v_strength_first = unit_interval(
        "i2v_strength_first",
        request.i2v_strength_first,
        DEFAULT_I2V_STRENGTH_FIRST,
    )?;
    let i2v_strength_second = unit_interval(
        "i2v_strength_second",
        request.i2v_strength_second,
        DEFAULT_I2V_STRENGTH_SECOND,
    )?;

    let timeout = timeout_duration(request.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))?;

    let (frame_count, audio_duration) = if mode == GenerationMode::CustomAudio {
        let duration = audio_duration.ok_or_else(|| {
            CoreError::Validation("Audio duration is required in custom_audio mode".to_string())
        })?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Audio track must have a positive duration, got {duration}"
            )));
        }
        if request.frame_count.is_some() {
            tracing::debug!("Ignoring caller frame_count; derived from audio duration");
        }
        (derive_frame_count(duration, fps)?, Some(duration))
    } else {
        (
            bounded(
                "frame_count",
                request.frame_count,
                DEFAULT_FRAME_COUNT,
                MAX_FRAME_COUNT,
            )?,
            None,
        )
    };

    let (seed, seed_generated) = resolve_seed(request.seed, mode, rng)?;

    let prompt = request
        .prompt_text()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    let negative_prompt = request
        .negative_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string());

    Ok(ResolvedParameters {
        mode,
        prompt,
        negative_prompt,
        width,
        height,
        frame_count,
        steps,
        cfg,
        fps,
        seed,
        seed_generated,
        timeout,
        img_compression,
        i2v_strength_first,
        i2v_strength_second,
        audio_duration,
    })
}

/// Number of frames covering an audio track: `floor(duration * fps) + 1`.
///
/// Fails when the result would exceed [`MAX_FRAME_COUNT`].
pub fn derive_frame_count(audio_duration_secs: f64, fps: u32) -> Result<u32, CoreError> {
    let frames = (audio_duration_secs * f64::from(fps)).floor();
    if !frames.is_finite() || frames < 0.0 || frames >= f64::from(MAX_FRAME_COUNT) {
        return Err(CoreError::Validation(format!(
            "Audio track of {audio_duration_secs}s at {fps} fps exceeds {MAX_FRAME_COUNT} frames"
        )));
    }
    Ok(frames as u32 + 1)
}

/// Convert a timeout in seconds, rejecting non-positive, non-finite and
/// over-long values.
pub fn timeout_duration(secs: f64) -> Result<Duration, CoreError> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_TIMEOUT_SECS {
        return Err(CoreError::Validation(format!(
            "timeout must be between 0 and {MAX_TIMEOUT_SECS} seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        CoreError::Validation(format!("timeout {secs} is not representable: {e}"))
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Use the requested seed, or draw one when absent or `-1`.
fn resolve_seed<R: Rng>(
    requested: Option<i64>,
    mode: GenerationMode,
    rng: &mut R,
) -> Result<(i64, bool), CoreError> {
    match requested {
        None | Some(RANDOM_SEED_SENTINEL) => {
            let seed = rng.random_range(0..=mode.max_seed());
            tracing::info!(seed, "Generated random seed");
            Ok((seed, true))
        }
        Some(seed) if (0..=mode.max_seed()).contains(&seed) => Ok((seed, false)),
        Some(seed) => Err(CoreError::Validation(format!(
            "seed must be -1 or between 0 and {}, got {seed}",
            mode.max_seed()
        ))),
    }
}

fn bounded(field: &str, value: Option<u32>, default: u32, max: u32) -> Result<u32, CoreError> {
    match value {
        Some(0) => Err(CoreError::Validation(format!(
            "{field} must be greater than zero"
        ))),
        Some(v) if v > max => Err(CoreError::Validation(format!(
            "{field} must be at most {max}, got {v}"
        ))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn unit_interval(field: &str, value: Option<f64>, default: f64) -> Result<f64, CoreError> {
    let v = value.unwrap_or(default);
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be between 0.0 and 1.0, got {v}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
