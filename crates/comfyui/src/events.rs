//! Job lifecycle events published while a pipeline run progresses.
//!
//! Emitted on a `tokio::sync::broadcast` channel; a run with no
//! subscribers simply drops them.

use serde::Serialize;
use ltxv_core::types::PromptId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// The readiness probe observed a healthy engine.
    EngineReady,

    /// The workflow was queued.
    Submitted { prompt_id: PromptId },

    /// Still waiting; emitted once per progress interval boundary.
    Progress {
        prompt_id: PromptId,
        elapsed_secs: u64,
    },

    /// Outputs appeared in history.
    Completed { prompt_id: PromptId },

    /// The run ended in a failure. `prompt_id` is absent when the failure
    /// happened before submission.
    Failed {
        prompt_id: Option<PromptId>,
        error: String,
    },

    /// The poll budget ran out.
    TimedOut { prompt_id: PromptId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_event_tag() {
        let event = JobEvent::Progress {
            prompt_id: "p1".into(),
            elapsed_secs: 20,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "progress", "prompt_id": "p1", "elapsed_secs": 20 })
        );
        assert_eq!(
            serde_json::to_value(JobEvent::EngineReady).unwrap(),
            json!({ "event": "engine_ready" })
        );
    }
}
