//! The inference-engine surface the pipeline depends on.
//!
//! [`crate::api::ComfyUIApi`] is the HTTP implementation; integration
//! tests substitute scripted engines.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ComfyUIApiError, SubmitResponse};

#[async_trait]
pub trait ComfyUIEngine: Send + Sync {
    /// Probe the health endpoint (`GET /system_stats`).
    async fn check_ready(&self) -> Result<(), ComfyUIApiError>;

    /// Queue a bound workflow graph (`POST /prompt`).
    async fn submit_workflow(&self, workflow: &Value) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Raw history document for one prompt (`GET /history/{prompt_id}`).
    async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError>;

    /// Remove a prompt from the queue (`POST /queue`).
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// Interrupt whatever is currently executing (`POST /interrupt`).
    async fn interrupt(&self) -> Result<(), ComfyUIApiError>;
}
