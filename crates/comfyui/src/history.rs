//! Typed view of `GET /history/{prompt_id}` responses.
//!
//! The endpoint returns `{}` until the prompt has been picked up, then
//! `{"<prompt_id>": {"outputs": {...}, "status": {...}}}`:
//!
//! ```json
//! {
//!   "3f2a...": {
//!     "outputs": { "75": { "videos": [{ "filename": "LTX_00001.mp4", "subfolder": "" }] } },
//!     "status": {
//!       "status_str": "success",
//!       "completed": true,
//!       "messages": [["execution_start", { "prompt_id": "3f2a..." }]]
//!     }
//!   }
//! }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs in emission order.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// What one history poll says about a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    /// Not in history yet, or still executing.
    Pending,
    /// Finished; may carry an empty outputs map.
    Completed(Map<String, Value>),
    /// The engine reported the execution itself failed.
    Failed(String),
}

impl HistoryStatus {
    pub fn is_error(&self) -> bool {
        self.status_str.as_deref() == Some("error")
    }

    pub fn is_success(&self) -> bool {
        self.completed && self.status_str.as_deref() == Some("success")
    }

    /// Best human-readable failure message found in `messages`.
    pub fn error_message(&self) -> String {
        self.messages
            .iter()
            .find_map(describe_message)
            .unwrap_or_else(|| {
                format!(
                    "Execution failed with status '{}'",
                    self.status_str.as_deref().unwrap_or("error")
                )
            })
    }
}

fn describe_message(message: &Value) -> Option<String> {
    let pair = message.as_array()?;
    let kind = pair.first()?.as_str()?;
    let payload = pair.get(1);

    match kind {
        "execution_error" => {
            let payload = payload?;
            let text = payload.get("exception_message")?.as_str()?.trim();
            let described = match payload.get("exception_type").and_then(Value::as_str) {
                Some(ty) if !ty.is_empty() => format!("{ty}: {text}"),
                _ => text.to_string(),
            };
            Some(match payload.get("node_id").and_then(Value::as_str) {
                Some(node) => format!("{described} (node {node})"),
                None => described,
            })
        }
        "execution_interrupted" => Some("Execution interrupted".to_string()),
        _ => None,
    }
}

/// Classify a raw history document for `prompt_id`.
///
/// An error status wins over any partial outputs. Returns `Err` only
/// when the entry for `prompt_id` exists but is malformed.
pub fn classify(history: &Value, prompt_id: &str) -> Result<HistoryState, serde_json::Error> {
    let Some(raw) = history.get(prompt_id) else {
        return Ok(HistoryState::Pending);
    };
    let entry: HistoryEntry = serde_json::from_value(raw.clone())?;

    if let Some(status) = &entry.status {
        if status.is_error() {
            return Ok(HistoryState::Failed(status.error_message()));
        }
    }

    if !entry.outputs.is_empty() {
        return Ok(HistoryState::Completed(entry.outputs));
    }

    match &entry.status {
        Some(status) if status.is_success() => Ok(HistoryState::Completed(Map::new())),
        _ => Ok(HistoryState::Pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn absent_prompt_is_pending() {
        assert_eq!(classify(&json!({}), "p1").unwrap(), HistoryState::Pending);
    }

    #[test]
    fn outputs_mean_completed() {
        let history = json!({
            "p1": {
                "outputs": { "75": { "videos": [{ "filename": "a.mp4" }] } },
                "status": { "status_str": "success", "completed": true, "messages": [] }
            }
        });
        assert_matches!(
            classify(&history, "p1").unwrap(),
            HistoryState::Completed(outputs) if outputs.contains_key("75")
        );
    }

    #[test]
    fn running_prompt_without_outputs_is_pending() {
        let history = json!({ "p1": { "outputs": {}, "status": { "completed": false } } });
        assert_eq!(classify(&history, "p1").unwrap(), HistoryState::Pending);
    }

    #[test]
    fn success_with_no_outputs_is_completed_empty() {
        let history = json!({
            "p1": { "outputs": {}, "status": { "status_str": "success", "completed": true } }
        });
        assert_eq!(
            classify(&history, "p1").unwrap(),
            HistoryState::Completed(Map::new())
        );
    }

    #[test]
    fn error_status_carries_engine_message() {
        let history = json!({
            "p1": {
                "outputs": { "12": { "images": [] } },
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", { "prompt_id": "p1" }],
                        ["execution_error", {
                            "prompt_id": "p1",
                            "node_id": "92:9",
                            "node_type": "LTXVScheduler",
                            "exception_type": "torch.OutOfMemoryError",
                            "exception_message": "CUDA out of memory\n"
                        }]
                    ]
                }
            }
        });
        assert_eq!(
            classify(&history, "p1").unwrap(),
            HistoryState::Failed("torch.OutOfMemoryError: CUDA out of memory (node 92:9)".into())
        );
    }

    #[test]
    fn error_status_without_details() {
        let history = json!({ "p1": { "status": { "status_str": "error", "messages": [] } } });
        assert_eq!(
            classify(&history, "p1").unwrap(),
            HistoryState::Failed("Execution failed with status 'error'".into())
        );
    }

    #[test]
    fn malformed_entry_is_err() {
        let history = json!({ "p1": { "outputs": "not an object" } });
        assert!(classify(&history, "p1").is_err());
    }
}
