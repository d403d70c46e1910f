//! ComfyUI workflow graph templates.
//!
//! A template is the "API format" export of a ComfyUI workflow: an object
//! keyed by node ID whose values carry `class_type` and `inputs`:
//!
//! ```json
//! {
//!   "98": { "class_type": "LoadImage", "inputs": { "image": "example.png" } },
//!   "92:11": { "class_type": "RandomNoise", "inputs": { "noise_seed": 0 } }
//! }
//! ```
//!
//! Templates evolve independently of this crate, so lookups and writes by
//! node ID are optional: writing to a node the template does not contain
//! is a no-op, not an error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::params::GenerationMode;

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// ComfyUI class type (e.g. "LoadImage", "CLIPTextEncode").
    #[serde(default)]
    pub class_type: String,
    /// Literal values and `[node_id, slot]` links, keyed by input name.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Anything else the export carries (`_meta`, etc.), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A workflow graph keyed by node ID.
///
/// Owned by a single pipeline run: loaded from a template, rewritten by
/// the binder, serialized for submission, then dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowGraph {
    /// Build a graph from an API-format workflow JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Load the template for `mode` from `workflow_dir`.
    pub async fn load_for_mode(workflow_dir: &Path, mode: GenerationMode) -> Result<Self, CoreError> {
        Self::load(&workflow_dir.join(mode.template_filename())).await
    }

    /// Load and parse a template file.
    ///
    /// Fails with [`CoreError::TemplateLoad`] when the file is missing,
    /// is not a JSON object of nodes, or contains no nodes at all.
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let shown = path.to_string_lossy().to_string();
        tracing::info!(path = %shown, "Loading workflow template");

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::TemplateLoad {
                path: shown.clone(),
                reason: e.to_string(),
            })?;

        let graph: WorkflowGraph =
            serde_json::from_str(&raw).map_err(|e| CoreError::TemplateLoad {
                path: shown.clone(),
                reason: format!("malformed workflow JSON: {e}"),
            })?;

        if graph.is_empty() {
            return Err(CoreError::TemplateLoad {
                path: shown,
                reason: "workflow contains no nodes".to_string(),
            });
        }

        tracing::debug!(path = %shown, node_count = graph.len(), "Workflow template loaded");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// Iterate nodes in node-ID order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Current value of one input field, if both node and field exist.
    pub fn input(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node_id).and_then(|n| n.inputs.get(field))
    }

    /// Set an input field on a node.
    ///
    /// Returns `false` (and leaves the graph untouched) when the node does
    /// not exist in this template.
    pub fn set_input(&mut self, node_id: &str, field: &str, value: Value) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.inputs.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Serialize to the JSON value submitted as `{"prompt": ...}`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample() -> WorkflowGraph {
        WorkflowGraph::from_value(json!({
            "98": {
                "class_type": "LoadImage",
                "inputs": { "image": "example.png" },
                "_meta": { "title": "Load Image" }
            },
            "92:11": {
                "class_type": "RandomNoise",
                "inputs": { "noise_seed": 0 }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_nodes_and_inputs() {
        let graph = sample();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node("98").unwrap().class_type, "LoadImage");
        assert_eq!(graph.input("92:11", "noise_seed"), Some(&json!(0)));
    }

    #[test]
    fn set_input_on_existing_node() {
        let mut graph = sample();
        assert!(graph.set_input("92:11", "noise_seed", json!(42)));
        assert_eq!(graph.input("92:11", "noise_seed"), Some(&json!(42)));
    }

    #[test]
    fn set_input_on_missing_node_is_noop() {
        let mut graph = sample();
        let before = graph.clone();
        assert!(!graph.set_input("404", "text", json!("ignored")));
        assert_eq!(graph, before);
    }

    #[test]
    fn unknown_node_keys_survive_round_trip() {
        let value = sample().to_value();
        assert_eq!(value["98"]["_meta"]["title"], "Load Image");
        assert_eq!(value["98"]["inputs"]["image"], "example.png");
    }

    #[test]
    fn rejects_non_object_graph() {
        assert!(WorkflowGraph::from_value(json!([1, 2, 3])).is_err());
    }

    #[tokio::test]
    async fn load_missing_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkflowGraph::load(&dir.path().join("nope.json"))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::TemplateLoad { .. });
    }

    #[tokio::test]
    async fn load_malformed_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = WorkflowGraph::load(&path).await.unwrap_err();
        assert_matches!(err, CoreError::TemplateLoad { reason, .. } if reason.contains("malformed"));
    }

    #[tokio::test]
    async fn load_empty_template_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, "{}").unwrap();
        assert_matches!(
            WorkflowGraph::load(&path).await,
            Err(CoreError::TemplateLoad { .. })
        );
    }

    #[tokio::test]
    async fn load_for_mode_uses_mode_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("workflow_custom_audio.json"),
            r#"{"120": {"class_type": "LoadAudio", "inputs": {"audio": "a.wav"}}}"#,
        )
        .unwrap();
        let graph = WorkflowGraph::load_for_mode(dir.path(), GenerationMode::CustomAudio)
            .await
            .unwrap();
        assert!(graph.contains("120"));
    }
}
