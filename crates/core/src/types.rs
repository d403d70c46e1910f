/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque identifier returned by ComfyUI for one queued execution.
pub type PromptId = String;
