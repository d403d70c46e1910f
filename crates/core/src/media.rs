//! Base64 media payloads and the engine's input/output directories.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::CoreError;

/// File name the input image is written under (referenced by LoadImage).
pub const INPUT_IMAGE_FILENAME: &str = "input_image.png";

/// Stem of the raw uploaded audio file; the extension is sniffed.
pub const INPUT_AUDIO_STEM: &str = "input_audio";

/// File name of the normalised audio track (referenced by LoadAudio).
pub const INPUT_AUDIO_WAV_FILENAME: &str = "input_audio.wav";

/// Marker separating a data URI header from its payload.
const DATA_URI_MARKER: &str = "base64,";

/// A decoded payload plus the MIME type declared by its data URI, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Split an optional `data:<mime>;base64,` header off a payload.
///
/// Returns the bare base64 text and the declared MIME type.
pub fn strip_data_uri(data: &str) -> (&str, Option<&str>) {
    match data.find(DATA_URI_MARKER) {
        Some(idx) => {
            let header = &data[..idx];
            let mime = header
                .strip_prefix("data:")
                .map(|h| h.trim_end_matches(';'))
                .filter(|m| !m.is_empty());
            (&data[idx + DATA_URI_MARKER.len()..], mime)
        }
        None => (data, None),
    }
}

/// Decode a base64 payload (with or without a data URI header).
///
/// Embedded whitespace and line breaks are ignored.
pub fn decode_payload(field: &'static str, data: &str) -> Result<DecodedPayload, CoreError> {
    let (body, mime) = strip_data_uri(data.trim());
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| CoreError::InvalidMedia {
            field,
            reason: format!("invalid base64: {e}"),
        })?;

    if bytes.is_empty() {
        return Err(CoreError::InvalidMedia {
            field,
            reason: "payload decodes to zero bytes".to_string(),
        });
    }

    Ok(DecodedPayload {
        bytes,
        mime: mime.map(str::to_string),
    })
}

/// Encode bytes as standard base64 (no data URI header).
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Pick a file extension for an uploaded audio track.
///
/// Prefers the data URI MIME type, then magic bytes, then `bin` (ffmpeg
/// probes the container itself, the extension is only cosmetic).
pub fn audio_extension(mime: Option<&str>, bytes: &[u8]) -> &'static str {
    if let Some(mime) = mime {
        match mime {
            "audio/wav" | "audio/x-wav" | "audio/wave" => return "wav",
            "audio/mpeg" | "audio/mp3" => return "mp3",
            "audio/ogg" => return "ogg",
            "audio/flac" | "audio/x-flac" => return "flac",
            "audio/mp4" | "audio/aac" | "audio/x-m4a" => return "m4a",
            "audio/webm" => return "webm",
            _ => {}
        }
    }

    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        "wav"
    } else if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) {
        "mp3"
    } else if bytes.starts_with(b"OggS") {
        "ogg"
    } else if bytes.starts_with(b"fLaC") {
        "flac"
    } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        "m4a"
    } else {
        "bin"
    }
}

/// Write `bytes` to `dir/filename`, creating `dir` if needed.
pub async fn write_input_file(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CoreError::io(dir, e))?;

    let path = dir.join(filename);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| CoreError::io(&path, e))?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "Saved input file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn strips_data_uri_header() {
        let (body, mime) = strip_data_uri("data:image/png;base64,aGVsbG8=");
        assert_eq!(body, "aGVsbG8=");
        assert_eq!(mime, Some("image/png"));
    }

    #[test]
    fn bare_payload_passes_through() {
        assert_eq!(strip_data_uri("aGVsbG8="), ("aGVsbG8=", None));
    }

    #[test]
    fn decodes_prefixed_and_bare_payloads_alike() {
        let a = decode_payload("image", "data:image/png;base64,aGVsbG8=").unwrap();
        let b = decode_payload("image", "aGVs\nbG8=").unwrap();
        assert_eq!(a.bytes, b"hello");
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.mime.as_deref(), Some("image/png"));
        assert!(b.mime.is_none());
    }

    #[test]
    fn invalid_base64_is_invalid_media() {
        assert_matches!(
            decode_payload("audio", "***not base64***"),
            Err(CoreError::InvalidMedia { field: "audio", .. })
        );
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(decode_payload("image", "data:image/png;base64,").is_err());
    }

    #[test]
    fn audio_extension_from_mime() {
        assert_eq!(audio_extension(Some("audio/mpeg"), b""), "mp3");
        assert_eq!(audio_extension(Some("audio/x-wav"), b""), "wav");
    }

    #[test]
    fn audio_extension_from_magic_bytes() {
        assert_eq!(audio_extension(None, b"RIFF\0\0\0\0WAVEfmt "), "wav");
        assert_eq!(audio_extension(None, b"ID3\x04\0\0"), "mp3");
        assert_eq!(audio_extension(None, b"OggS\0\x02"), "ogg");
        assert_eq!(audio_extension(None, b"fLaC\0\0"), "flac");
        assert_eq!(audio_extension(None, b"\0\0\0\x20ftypM4A "), "m4a");
        assert_eq!(audio_extension(None, b"????"), "bin");
    }

    #[tokio::test]
    async fn write_input_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("comfyui").join("input");
        let path = write_input_file(&nested, INPUT_IMAGE_FILENAME, b"png")
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"png");
    }

    #[test]
    fn encode_matches_decode() {
        let encoded = encode_base64(b"video bytes");
        assert_eq!(decode_payload("video", &encoded).unwrap().bytes, b"video bytes");
    }
}
