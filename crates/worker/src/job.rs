//! Reading the single job document a worker invocation processes.
//!
//! Hosts deliver either an envelope `{"id": "...", "input": {...}}` or
//! the bare request object.

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::io::AsyncReadExt;

/// One job as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDocument {
    /// Host-assigned job ID, when the envelope carried one.
    pub id: Option<String>,
    /// The request object handed to the pipeline.
    pub input: Value,
}

/// Parse a job document, unwrapping the host envelope when present.
pub fn parse_job_document(raw: &str) -> anyhow::Result<JobDocument> {
    let value: Value = serde_json::from_str(raw).context("job document is not valid JSON")?;

    let Value::Object(mut obj) = value else {
        bail!("job document must be a JSON object");
    };

    match obj.remove("input") {
        Some(input @ Value::Object(_)) => {
            let id = obj.get("id").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            Ok(JobDocument { id, input })
        }
        Some(_) => bail!("job envelope 'input' must be a JSON object"),
        None => Ok(JobDocument {
            id: None,
            input: Value::Object(obj),
        }),
    }
}

/// Read the raw job document from `path`, or from stdin when `None`.
pub async fn read_job_source(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read job document {}", path.display())),
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read job document from stdin")?;
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_envelope() {
        let doc = parse_job_document(r#"{"id": "job-7", "input": {"prompt": "p"}}"#).unwrap();
        assert_eq!(doc.id.as_deref(), Some("job-7"));
        assert_eq!(doc.input, json!({ "prompt": "p" }));
    }

    #[test]
    fn numeric_envelope_id() {
        let doc = parse_job_document(r#"{"id": 12, "input": {}}"#).unwrap();
        assert_eq!(doc.id.as_deref(), Some("12"));
    }

    #[test]
    fn bare_request_passes_through() {
        let doc = parse_job_document(r#"{"image": "aGk=", "prompt": "p"}"#).unwrap();
        assert_eq!(doc.id, None);
        assert_eq!(doc.input["prompt"], "p");
    }

    #[test]
    fn rejects_non_object_documents() {
        assert!(parse_job_document("[1, 2]").is_err());
        assert!(parse_job_document("not json").is_err());
        assert!(parse_job_document(r#"{"input": "text"}"#).is_err());
    }
}
