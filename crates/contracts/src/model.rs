//! Artifact data model: the typed records a pipeline stage may persist.
//!
//! Every record rejects unknown fields. The structural checks in
//! [`crate::schema`] mirror these definitions field for field and produce
//! the dotted-path errors fed back to the model; these types are what
//! consumers work with once a document has passed.

use serde::{Deserialize, Serialize};

use crate::metadata::ArtifactMetadata;

/// How the build relates to existing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Greenfield,
    Extension,
    Refactor,
}

impl PlanMode {
    pub const VALUES: &'static [&'static str] = &["greenfield", "extension", "refactor"];
}

/// Severity shared by acceptance criteria and audit findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub const VALUES: &'static [&'static str] = &["minor", "major", "critical"];
}

/// Progress of one phase of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
}

impl PhaseStatus {
    pub const VALUES: &'static [&'static str] = &["pending", "in_progress", "complete"];
}

/// Outcome of an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pass,
    Fail,
}

impl AuditStatus {
    pub const VALUES: &'static [&'static str] = &["pass", "fail"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

/// A structured plan: the planner's terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildPlan {
    pub summary: String,
    pub mode: PlanMode,
    pub stack: StackSpec,
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

impl BuildPlan {
    /// Every planned file, in phase order.
    pub fn files(&self) -> impl Iterator<Item = (&Phase, &FileEntry)> {
        self.phases
            .iter()
            .flat_map(|phase| phase.file_manifest.iter().map(move |file| (phase, file)))
    }

    pub fn file(&self, path: &str) -> Option<(&Phase, &FileEntry)> {
        self.files().find(|(_, file)| file.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackSpec {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// One tier of the build. Files in a phase are built concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Phase {
    pub name: String,
    pub description: String,
    pub file_manifest: Vec<FileEntry>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub path: String,
    pub purpose: String,
    /// Paths of files, from this or an earlier phase, this file builds on.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptanceCriterion {
    pub description: String,
    pub severity: Severity,
}

/// The auditor's terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditVerdict {
    pub status: AuditStatus,
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

impl AuditVerdict {
    pub fn passed(&self) -> bool {
        self.status == AuditStatus::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Finding {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The builder's (or fixer's) terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedFileRecord {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_file_lookup_in_phase_order() {
        let plan: BuildPlan = serde_json::from_value(json!({
            "summary": "cli",
            "mode": "greenfield",
            "stack": {"language": "rust"},
            "phases": [
                {
                    "name": "core",
                    "description": "types",
                    "file_manifest": [{"path": "src/lib.rs", "purpose": "root"}],
                    "acceptance_criteria": []
                },
                {
                    "name": "cli",
                    "description": "binary",
                    "file_manifest": [
                        {"path": "src/main.rs", "purpose": "entry", "depends_on": ["src/lib.rs"]}
                    ],
                    "acceptance_criteria": [{"description": "builds", "severity": "critical"}],
                    "status": "in_progress"
                }
            ]
        }))
        .unwrap();

        let paths: Vec<_> = plan.files().map(|(_, f)| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs", "src/main.rs"]);
        let (phase, file) = plan.file("src/main.rs").unwrap();
        assert_eq!(phase.name, "cli");
        assert_eq!(phase.status, PhaseStatus::InProgress);
        assert_eq!(file.depends_on, vec!["src/lib.rs"]);
        assert_eq!(plan.phases[0].status, PhaseStatus::Pending);
    }

    #[test]
    fn unknown_fields_are_rejected_by_serde() {
        let result: Result<Finding, _> = serde_json::from_value(json!({
            "severity": "minor", "rule": "r", "message": "m", "line": 3
        }));
        assert!(result.is_err());
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
    }
}
