//! Terminal submission: the only way a loop run produces its artifact.
//!
//! The payload is untrusted. Any `metadata` it carries is stripped, the
//! rest is validated against the artifact's schema, and only a valid
//! document is stamped and persisted. Validation errors go back to the
//! model as the action result so it can correct the payload.

use async_trait::async_trait;
use buildloop_contracts::{self as contracts, ArtifactMetadata};
use buildloop_core::{ActionHandler, ActionName, ActionOutcome, Artifact, ArtifactKind, ArtifactStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SubmitArtifactAction {
    kind: ArtifactKind,
    store: Arc<dyn ArtifactStore>,
    key: String,
    model: Option<String>,
    build_id: Option<String>,
    expected_path: Option<String>,
}

impl SubmitArtifactAction {
    /// Persist a `kind` artifact under `key` in the kind's collection.
    pub fn new(kind: ArtifactKind, store: Arc<dyn ArtifactStore>, key: impl Into<String>) -> Self {
        Self {
            kind,
            store,
            key: key.into(),
            model: None,
            build_id: None,
            expected_path: None,
        }
    }

    /// Model name stamped into the metadata.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    /// Require a generated-file submission to be for this path.
    pub fn expecting_path(mut self, path: impl Into<String>) -> Self {
        self.expected_path = Some(path.into());
        self
    }

    fn check(&self, document: &Value) -> Vec<String> {
        let mut errors = contracts::validate(self.kind, document);
        if errors.is_empty()
            && let Some(expected) = &self.expected_path
            && document["path"].as_str() != Some(expected.as_str())
        {
            errors.push(format!("path: expected '{expected}'"));
        }
        errors
    }
}

#[async_trait]
impl ActionHandler for SubmitArtifactAction {
    fn action(&self) -> ActionName {
        match self.kind {
            ArtifactKind::Plan => ActionName::SubmitPlan,
            ArtifactKind::AuditVerdict => ActionName::SubmitVerdict,
            ArtifactKind::GeneratedFile => ActionName::SubmitFile,
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            ArtifactKind::Plan => {
                "Submit the finished build plan. Ends your task when the plan is valid; \
                 otherwise returns the validation errors to fix."
            }
            ArtifactKind::AuditVerdict => {
                "Submit your audit verdict. A failing verdict must list its findings."
            }
            ArtifactKind::GeneratedFile => {
                "Submit the complete content of the file. Ends your task when accepted."
            }
        }
    }

    fn input_schema(&self) -> Value {
        input_schema(self.kind)
    }

    async fn execute(&self, input: Value) -> ActionOutcome {
        let mut document = input;
        if contracts::strip_metadata(&mut document) {
            warn!(kind = %self.kind, "Discarding caller-supplied metadata");
        }

        let errors = self.check(&document);
        if !errors.is_empty() {
            info!(kind = %self.kind, errors = errors.len(), "Submission rejected");
            return ActionOutcome::Rejected(errors);
        }

        let metadata = ArtifactMetadata::new(self.model.clone(), self.build_id.clone());
        contracts::stamp_metadata(&mut document, &metadata);

        if let Err(e) = self
            .store
            .store(self.kind.collection(), &self.key, document.clone())
            .await
        {
            warn!(kind = %self.kind, key = %self.key, error = %e, "Failed to persist artifact");
            return ActionOutcome::error(format!("could not persist {}: {e}", self.kind));
        }

        info!(kind = %self.kind, key = %self.key, artifact_id = %metadata.artifact_id, "Artifact accepted");
        ActionOutcome::Completed(Artifact::new(self.kind, self.key.clone(), document))
    }
}

fn input_schema(kind: ArtifactKind) -> Value {
    let severity = json!({ "type": "string", "enum": contracts::Severity::VALUES });
    match kind {
        ArtifactKind::Plan => json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "mode": { "type": "string", "enum": contracts::PlanMode::VALUES },
                "stack": {
                    "type": "object",
                    "properties": {
                        "language": { "type": "string" },
                        "framework": { "type": "string" },
                        "dependencies": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["language"]
                },
                "phases": {
                    "type": "array",
                    "description": "Ordered tiers; files in one phase are built in parallel",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "description": { "type": "string" },
                            "file_manifest": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "path": { "type": "string" },
                                        "purpose": { "type": "string" },
                                        "depends_on": { "type": "array", "items": { "type": "string" } }
                                    },
                                    "required": ["path", "purpose"]
                                }
                            },
                            "acceptance_criteria": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "description": { "type": "string" },
                                        "severity": severity
                                    },
                                    "required": ["description", "severity"]
                                }
                            },
                            "status": { "type": "string", "enum": contracts::PhaseStatus::VALUES }
                        },
                        "required": ["name", "description", "file_manifest", "acceptance_criteria"]
                    }
                }
            },
            "required": ["summary", "mode", "stack", "phases"]
        }),
        ArtifactKind::AuditVerdict => json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": contracts::AuditStatus::VALUES },
                "summary": { "type": "string" },
                "findings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "severity": severity,
                            "rule": { "type": "string" },
                            "message": { "type": "string" },
                            "path": { "type": "string" }
                        },
                        "required": ["severity", "rule", "message"]
                    }
                }
            },
            "required": ["status", "summary"]
        }),
        ArtifactKind::GeneratedFile => json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string", "description": "The complete file content" },
                "notes": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path", "content"]
        }),
    }
}
