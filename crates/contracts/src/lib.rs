//! Artifact contracts: the strict schemas that gate what a pipeline stage
//! may persist.
//!
//! Validation runs at two points:
//!
//! - **Producer side.** A terminal action validates its payload before the
//!   artifact is stored. Errors go back to the model as an action result so
//!   it can correct itself.
//! - **Consumer side.** A stage re-validates an artifact before trusting it
//!   (e.g. the build pipeline re-checks a stored plan). Failure here is fatal.
//!
//! ```text
//! model payload ─▶ strip_metadata ─▶ validate ─┬─▶ stamp_metadata ─▶ store
//!                                              └─▶ errors ─▶ back to the model
//! ```

mod metadata;
mod model;
pub mod schema;

pub use metadata::{ArtifactMetadata, METADATA_FIELD, SCHEMA_VERSION, stamp_metadata, strip_metadata};
pub use model::{
    AcceptanceCriterion, AuditStatus, AuditVerdict, BuildPlan, FileEntry, Finding,
    GeneratedFileRecord, Phase, PhaseStatus, PlanMode, Severity, StackSpec,
};
pub use schema::{validate, validate_file_record, validate_plan, validate_verdict};

use buildloop_core::ArtifactKind;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub type ContractResult<T> = std::result::Result<T, ContractError>;

/// Errors from the contract subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("invalid {kind}: {}", .errors.join("; "))]
    Invalid { kind: ArtifactKind, errors: Vec<String> },

    #[error("{kind} does not match its typed model: {source}")]
    Model {
        kind: ArtifactKind,
        #[source]
        source: serde_json::Error,
    },
}

impl ContractError {
    /// The individual validation errors, one per problem.
    pub fn errors(&self) -> Vec<String> {
        match self {
            Self::Invalid { errors, .. } => errors.clone(),
            Self::Model { source, .. } => vec![source.to_string()],
        }
    }
}

/// Validate and then deserialize a document into its typed record.
pub fn parse<T: DeserializeOwned>(kind: ArtifactKind, document: &Value) -> ContractResult<T> {
    let errors = validate(kind, document);
    if !errors.is_empty() {
        return Err(ContractError::Invalid { kind, errors });
    }
    serde_json::from_value(document.clone()).map_err(|source| ContractError::Model { kind, source })
}

pub fn parse_plan(document: &Value) -> ContractResult<BuildPlan> {
    parse(ArtifactKind::Plan, document)
}

pub fn parse_verdict(document: &Value) -> ContractResult<AuditVerdict> {
    parse(ArtifactKind::AuditVerdict, document)
}

pub fn parse_file_record(document: &Value) -> ContractResult<GeneratedFileRecord> {
    parse(ArtifactKind::GeneratedFile, document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_with_every_error() {
        let err = parse_verdict(&json!({"status": "maybe"})).unwrap_err();
        assert_eq!(
            err.errors(),
            vec![
                "status: 'maybe' is not one of [pass, fail]",
                "summary: field required",
            ]
        );
        assert!(err.to_string().starts_with("invalid audit_verdict: "));
    }

    #[test]
    fn parse_stamped_record() {
        let mut doc = json!({"path": "src/lib.rs", "content": "//! lib"});
        stamp_metadata(&mut doc, &ArtifactMetadata::new(None, Some("b1".into())));
        let record = parse_file_record(&doc).unwrap();
        assert_eq!(record.metadata.unwrap().build_id.as_deref(), Some("b1"));
    }
}
