//! FFmpeg/FFprobe process helpers for uploaded audio tracks.
//!
//! Both tools run as external processes; nothing here decodes media
//! itself. [`AudioToolkit`] is the seam the pipeline calls through so
//! tests can substitute canned durations.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("media file not found: {0}")]
    MediaNotFound(String),

    #[error("media has no measurable duration: {0}")]
    NoDuration(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<i32>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Toolkit seam
// ---------------------------------------------------------------------------

/// External audio tooling used for custom-audio jobs.
#[async_trait]
pub trait AudioToolkit: Send + Sync {
    /// Re-encode `input` as PCM WAV at `output`.
    async fn normalise_to_wav(&self, input: &Path, output: &Path) -> Result<(), FfmpegError>;

    /// Duration of the media at `path`, in seconds.
    async fn duration_secs(&self, path: &Path) -> Result<f64, FfmpegError>;
}

/// [`AudioToolkit`] backed by the `ffmpeg` and `ffprobe` binaries on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegToolkit;

#[async_trait]
impl AudioToolkit for FfmpegToolkit {
    async fn normalise_to_wav(&self, input: &Path, output: &Path) -> Result<(), FfmpegError> {
        convert_audio_to_wav(input, output).await
    }

    async fn duration_secs(&self, path: &Path) -> Result<f64, FfmpegError> {
        let probe = probe_media(path).await?;
        let duration = parse_duration(&probe)
            .filter(|d| *d > 0.0)
            .ok_or_else(|| FfmpegError::NoDuration(path.to_string_lossy().to_string()))?;

        tracing::debug!(
            path = %path.display(),
            duration_secs = duration,
            sample_rate = ?parse_sample_rate(&probe),
            format = probe.format.format_name.as_deref().unwrap_or("unknown"),
            "Probed audio track",
        );
        Ok(duration)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_media(path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::MediaNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Re-encode an audio file as 16-bit PCM WAV, dropping any video stream.
pub async fn convert_audio_to_wav(input: &Path, output: &Path) -> Result<(), FfmpegError> {
    if !input.exists() {
        return Err(FfmpegError::MediaNotFound(
            input.to_string_lossy().to_string(),
        ));
    }

    let result = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le"])
        .arg(output)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !result.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: result.status.code(),
            stderr: String::from_utf8_lossy(&result.stderr).to_string(),
        });
    }

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        "Converted audio track to WAV",
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first audio stream in the ffprobe output.
fn first_audio_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
}

/// Parse the media duration in seconds from ffprobe output.
///
/// Prefers the container duration, then the first audio stream's.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    let from_format = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());

    from_format.or_else(|| {
        first_audio_stream(probe)
            .and_then(|s| s.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
    })
}

/// Sample rate of the first audio stream, in Hz.
pub fn parse_sample_rate(probe: &FfprobeOutput) -> Option<i32> {
    first_audio_stream(probe)
        .and_then(|s| s.sample_rate.as_deref())
        .and_then(|r| r.parse::<i32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_stream(duration: Option<&str>) -> FfprobeStream {
        FfprobeStream {
            index: 0,
            codec_name: Some("pcm_s16le".into()),
            codec_type: Some("audio".into()),
            sample_rate: Some("48000".into()),
            channels: Some(2),
            duration: duration.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_duration_from_format() {
        let probe = FfprobeOutput {
            streams: vec![audio_stream(Some("3.0"))],
            format: FfprobeFormat {
                duration: Some("4.000000".to_string()),
                format_name: Some("wav".into()),
            },
        };
        assert!((parse_duration(&probe).unwrap() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_from_audio_stream() {
        let probe = FfprobeOutput {
            streams: vec![audio_stream(Some("7.25"))],
            format: FfprobeFormat {
                duration: None,
                format_name: None,
            },
        };
        assert!((parse_duration(&probe).unwrap() - 7.25).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_missing() {
        let probe = FfprobeOutput {
            streams: vec![audio_stream(None)],
            format: FfprobeFormat {
                duration: Some("N/A".into()),
                format_name: None,
            },
        };
        assert!(parse_duration(&probe).is_none());
    }

    #[test]
    fn test_parse_sample_rate() {
        let probe = FfprobeOutput {
            streams: vec![audio_stream(None)],
            format: FfprobeFormat {
                duration: None,
                format_name: None,
            },
        };
        assert_eq!(parse_sample_rate(&probe), Some(48000));
    }

    #[test]
    fn test_parses_real_ffprobe_json() {
        let json = r#"{
            "streams": [{"index": 0, "codec_name": "mp3", "codec_type": "audio",
                         "sample_rate": "44100", "channels": 2, "duration": "12.512653"}],
            "format": {"duration": "12.512653", "format_name": "mp3", "size": "200000"}
        }"#;
        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert!((parse_duration(&probe).unwrap() - 12.512653).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media(Path::new("/definitely/not/here.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::MediaNotFound(_)));
    }
}
