//! System-stamped artifact metadata.
//!
//! The metadata envelope is written by the system, never by the model: any
//! `metadata` a submission carries is stripped before validation and
//! replaced with a fresh stamp before persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the artifact schemas, carried inside every stored document.
pub const SCHEMA_VERSION: u32 = 1;

/// Key under which metadata lives in a stored document.
pub const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactMetadata {
    pub artifact_id: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    /// Model that produced the artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

impl ArtifactMetadata {
    pub fn new(model: Option<String>, build_id: Option<String>) -> Self {
        Self {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            model,
            build_id,
        }
    }
}

/// Remove any caller-supplied metadata envelope. Returns whether one was present.
pub fn strip_metadata(document: &mut Value) -> bool {
    match document {
        Value::Object(map) => map.remove(METADATA_FIELD).is_some(),
        _ => false,
    }
}

/// Write `metadata` into the document, replacing anything already there.
/// Non-object documents are left untouched.
pub fn stamp_metadata(document: &mut Value, metadata: &ArtifactMetadata) {
    if let Value::Object(map) = document
        && let Ok(stamp) = serde_json::to_value(metadata)
    {
        map.insert(METADATA_FIELD.to_string(), stamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_removes_forged_metadata() {
        let mut doc = json!({"summary": "x", "metadata": {"schema_version": 99}});
        assert!(strip_metadata(&mut doc));
        assert_eq!(doc, json!({"summary": "x"}));
        assert!(!strip_metadata(&mut doc));
    }

    #[test]
    fn stamp_carries_version_and_ids() {
        let mut doc = json!({"summary": "x"});
        let meta = ArtifactMetadata::new(Some("claude-sonnet-4".into()), Some("b1".into()));
        stamp_metadata(&mut doc, &meta);

        let stamped = &doc["metadata"];
        assert_eq!(stamped["schema_version"], json!(SCHEMA_VERSION));
        assert_eq!(stamped["model"], json!("claude-sonnet-4"));
        assert_eq!(stamped["build_id"], json!("b1"));
        assert_eq!(stamped["artifact_id"], json!(meta.artifact_id));

        let back: ArtifactMetadata = serde_json::from_value(stamped.clone()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn stamp_ignores_non_objects() {
        let mut doc = json!(["not", "an", "object"]);
        stamp_metadata(&mut doc, &ArtifactMetadata::new(None, None));
        assert_eq!(doc, json!(["not", "an", "object"]));
    }
}
