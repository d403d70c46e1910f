//! Domain logic for the LTX video job adapter.
//!
//! Everything here is independent of the ComfyUI transport: request
//! parsing and parameter resolution, workflow graph templates and the
//! per-mode binders, artifact lookup in the engine's output tree, and
//! the media helpers that shell out to `ffmpeg`/`ffprobe`.

pub mod artifact;
pub mod binder;
pub mod clock;
pub mod error;
pub mod ffmpeg;
pub mod media;
pub mod params;
pub mod request;
pub mod types;
pub mod workflow;
