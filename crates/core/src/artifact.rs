//! Artifacts and the key-value store they are persisted in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::StoreError;

/// The kinds of terminal object a loop run can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plan,
    AuditVerdict,
    GeneratedFile,
}

impl ArtifactKind {
    /// The store collection artifacts of this kind live in.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Plan => "plans",
            Self::AuditVerdict => "verdicts",
            Self::GeneratedFile => "files",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::AuditVerdict => write!(f, "audit_verdict"),
            Self::GeneratedFile => write!(f, "generated_file"),
        }
    }
}

/// A validated, metadata-stamped terminal object. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    kind: ArtifactKind,
    key: String,
    document: serde_json::Value,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, key: impl Into<String>, document: serde_json::Value) -> Self {
        Self {
            kind,
            key: key.into(),
            document,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Key under which the artifact was persisted.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }
}

/// Opaque key-value persistence for artifacts and reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Store a JSON document, replacing any existing one under the key.
    async fn store(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Fetch a document. `None` when the key is absent.
    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// List keys in a collection, sorted.
    async fn keys(&self, collection: &str) -> Result<Vec<String>, StoreError>;
}

/// Injected lookup for governance contracts by type.
///
/// `None` means "not found" and is surfaced to the reasoning service as a
/// structured error, never raised.
#[async_trait]
pub trait ContractFetcher: Send + Sync {
    async fn fetch(&self, contract_type: &str) -> Option<String>;
}
