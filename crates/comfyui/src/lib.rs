//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper and the [`engine::ComfyUIEngine`] seam
//! the pipeline drives, typed parsing of `/history` entries, the
//! readiness probe, and the job events published while a run progresses.

pub mod api;
pub mod engine;
pub mod events;
pub mod history;
pub mod readiness;
