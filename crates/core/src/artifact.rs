//! Locating the produced media file from an execution's outputs.
//!
//! ComfyUI output nodes describe their files inconsistently: `SaveVideo`
//! writes `videos`, `VHS_VideoCombine` writes `gifs`, other nodes use
//! `video`, `images` or `files`. An entry may be one object or a list,
//! and each item may be `{filename, subfolder, type}` or a bare filename.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Artifact-bearing output keys, highest priority first.
pub const ARTIFACT_KEYS: [(&str, ArtifactKind); 5] = [
    ("videos", ArtifactKind::Video),
    ("gifs", ArtifactKind::Gif),
    ("video", ArtifactKind::Video),
    ("images", ArtifactKind::Image),
    ("files", ArtifactKind::File),
];

/// Extensions accepted by the output directory scan.
pub const MEDIA_EXTENSIONS: [&str; 6] = ["mp4", "webm", "mov", "mkv", "avi", "gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Video,
    Gif,
    Image,
    File,
}

/// One candidate output file named by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReference {
    pub node_id: String,
    pub filename: String,
    pub subfolder: Option<String>,
    pub kind: ArtifactKind,
}

impl ArtifactReference {
    /// Path of this file under `output_dir`.
    ///
    /// `None` when the filename or subfolder would escape `output_dir`.
    pub fn path_in(&self, output_dir: &Path) -> Option<PathBuf> {
        let mut path = output_dir.to_path_buf();
        if let Some(sub) = self.subfolder.as_deref() {
            path.push(safe_relative(sub)?);
        }
        path.push(safe_relative(&self.filename)?);
        Some(path)
    }
}

/// Accept only plain relative paths (no `..`, no root).
fn safe_relative(raw: &str) -> Option<&Path> {
    let path = Path::new(raw);
    let plain = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (plain && !raw.is_empty()).then_some(path)
}

/// Collect every candidate in priority order: key first, then node ID.
pub fn collect_candidates(outputs: &Map<String, Value>) -> Vec<ArtifactReference> {
    let mut candidates = Vec::new();

    for (key, kind) in ARTIFACT_KEYS {
        for (node_id, node_output) in outputs {
            let Some(entry) = node_output.get(key) else {
                continue;
            };
            match entry {
                Value::Array(items) => candidates.extend(
                    items
                        .iter()
                        .filter_map(|item| parse_entry(node_id, item, kind)),
                ),
                single => candidates.extend(parse_entry(node_id, single, kind)),
            }
        }
    }

    candidates
}

fn parse_entry(node_id: &str, item: &Value, kind: ArtifactKind) -> Option<ArtifactReference> {
    let (filename, subfolder) = match item {
        Value::String(name) => (name.clone(), None),
        Value::Object(obj) => {
            let filename = obj.get("filename")?.as_str()?.to_string();
            let subfolder = obj
                .get("subfolder")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            (filename, subfolder)
        }
        _ => return None,
    };

    if filename.is_empty() {
        return None;
    }

    Some(ArtifactReference {
        node_id: node_id.to_string(),
        filename,
        subfolder,
        kind,
    })
}

/// A located artifact and its contents.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    /// The engine reference it came from; `None` when found by directory scan.
    pub reference: Option<ArtifactReference>,
    /// Last modification time of the file, when the filesystem reports one.
    pub modified_at: Option<Timestamp>,
}

/// Resolves artifact references against the engine's output directory.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    output_dir: PathBuf,
    modified_since: Option<SystemTime>,
}

impl ArtifactResolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            modified_since: None,
        }
    }

    /// Ignore files last modified before `since` in the directory scan.
    ///
    /// The output directory is shared between jobs; this keeps the scan
    /// from returning a video an earlier job left behind. Files named by
    /// the engine's outputs are not filtered.
    pub fn modified_since(mut self, since: SystemTime) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Read the first candidate that exists on disk, falling back to the
    /// newest media file anywhere under the output directory.
    pub async fn resolve(&self, outputs: &Map<String, Value>) -> Result<ResolvedArtifact, CoreError> {
        let candidates = collect_candidates(outputs);
        tracing::debug!(candidates = candidates.len(), "Resolving output artifact");

        for reference in candidates {
            let Some(path) = reference.path_in(&self.output_dir) else {
                tracing::warn!(
                    node_id = %reference.node_id,
                    filename = %reference.filename,
                    "Ignoring artifact reference outside the output directory",
                );
                continue;
            };

            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tracing::debug!(path = %path.display(), "Artifact candidate not on disk");
                continue;
            }

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| CoreError::io(&path, e))?;
            tracing::info!(
                path = %path.display(),
                node_id = %reference.node_id,
                kind = ?reference.kind,
                "Found output artifact",
            );
            return Ok(ResolvedArtifact {
                modified_at: modified_at(&path).await,
                path,
                bytes,
                reference: Some(reference),
            });
        }

        let dir = self.output_dir.clone();
        let since = self.modified_since;
        let newest = tokio::task::spawn_blocking(move || newest_media_file(&dir, since))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Output directory scan aborted");
                None
            });

        match newest {
            Some(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| CoreError::io(&path, e))?;
                tracing::info!(path = %path.display(), "Found output artifact by directory scan");
                Ok(ResolvedArtifact {
                    modified_at: modified_at(&path).await,
                    path,
                    bytes,
                    reference: None,
                })
            }
            None => {
                tracing::warn!(dir = %self.output_dir.display(), "No output artifact found");
                Err(CoreError::ArtifactNotFound)
            }
        }
    }
}

async fn modified_at(path: &Path) -> Option<Timestamp> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(Timestamp::from(modified))
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Most recently modified media file under `dir`, searched recursively,
/// skipping anything older than `since`.
fn newest_media_file(dir: &Path, since: Option<SystemTime>) -> Option<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && has_media_extension(entry.path()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.into_path())
        })
        .filter(|(modified, _)| since.is_none_or(|cutoff| *modified >= cutoff))
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
        .map(|(_, path)| path)
}
