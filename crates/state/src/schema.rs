//! State schemas: the fixed, typed set of fields each kind of state holds.
//!
//! Every field declares its merge policy through an exhaustive `match`, so
//! adding a field without choosing a policy is a build error rather than a
//! silent overwrite default.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reducer::MergePolicy;

/// Default cap for the per-file notes field.
pub const DEFAULT_NOTES_CAP: usize = 50;

/// Default cap for cross-tier lessons.
pub const DEFAULT_LESSONS_CAP: usize = 20;

/// A field declared by a state schema.
pub trait SchemaField: Copy + Eq + std::fmt::Debug + 'static {
    /// Every field of the schema.
    const ALL: &'static [Self];

    /// Key used in the underlying mapping.
    fn name(self) -> &'static str;

    /// Declared merge policy.
    fn policy(self) -> MergePolicy;
}

/// Fields of one file's build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileField {
    FilePath,
    Phase,
    FileSpec,
    Stack,
    AcceptanceCriteria,
    Lessons,
    GeneratedContent,
    AuditStatus,
    Findings,
    FindingHistory,
    FixHistory,
    FixRounds,
    Notes,
    StageOutputs,
    StageUsage,
    Status,
}

impl SchemaField for FileField {
    const ALL: &'static [Self] = &[
        Self::FilePath,
        Self::Phase,
        Self::FileSpec,
        Self::Stack,
        Self::AcceptanceCriteria,
        Self::Lessons,
        Self::GeneratedContent,
        Self::AuditStatus,
        Self::Findings,
        Self::FindingHistory,
        Self::FixHistory,
        Self::FixRounds,
        Self::Notes,
        Self::StageOutputs,
        Self::StageUsage,
        Self::Status,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::FilePath => "file_path",
            Self::Phase => "phase",
            Self::FileSpec => "file_spec",
            Self::Stack => "stack",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Lessons => "lessons",
            Self::GeneratedContent => "generated_content",
            Self::AuditStatus => "audit_status",
            Self::Findings => "findings",
            Self::FindingHistory => "finding_history",
            Self::FixHistory => "fix_history",
            Self::FixRounds => "fix_rounds",
            Self::Notes => "notes",
            Self::StageOutputs => "stage_outputs",
            Self::StageUsage => "stage_usage",
            Self::Status => "status",
        }
    }

    fn policy(self) -> MergePolicy {
        match self {
            Self::FilePath
            | Self::Phase
            | Self::FileSpec
            | Self::Stack
            | Self::AcceptanceCriteria
            | Self::Lessons
            | Self::GeneratedContent
            | Self::AuditStatus
            | Self::Findings
            | Self::FixRounds
            | Self::Status => MergePolicy::Overwrite,
            Self::FindingHistory | Self::FixHistory => MergePolicy::Append,
            Self::Notes => MergePolicy::AppendCapped(DEFAULT_NOTES_CAP),
            Self::StageOutputs | Self::StageUsage => MergePolicy::ShallowMerge,
        }
    }
}

/// Fields of the cross-tier lessons state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LessonField {
    Lessons,
    TierSummaries,
    CompletedFiles,
    Annotations,
}

impl SchemaField for LessonField {
    const ALL: &'static [Self] = &[
        Self::Lessons,
        Self::TierSummaries,
        Self::CompletedFiles,
        Self::Annotations,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Lessons => "lessons",
            Self::TierSummaries => "tier_summaries",
            Self::CompletedFiles => "completed_files",
            Self::Annotations => "annotations",
        }
    }

    fn policy(self) -> MergePolicy {
        match self {
            Self::Lessons => MergePolicy::AppendCapped(DEFAULT_LESSONS_CAP),
            Self::TierSummaries | Self::Annotations => MergePolicy::ShallowMerge,
            Self::CompletedFiles => MergePolicy::Append,
        }
    }
}

/// Lifecycle of one file through the build stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Generated,
    Passed,
    NeedsReview,
}

impl FileStatus {
    pub fn as_value(self) -> Value {
        // Unit variants always serialize to a string.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Typed read of a file's build state.
///
/// Fields the state has not been given yet come back as their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBuildState {
    pub file_path: String,
    pub phase: String,
    pub file_spec: Value,
    pub stack: Value,
    pub acceptance_criteria: Vec<Value>,
    pub lessons: Vec<String>,
    pub generated_content: Option<String>,
    pub audit_status: Option<String>,
    pub findings: Vec<Value>,
    pub finding_history: Vec<Value>,
    pub fix_history: Vec<Value>,
    pub fix_rounds: u32,
    pub notes: Vec<String>,
    pub stage_outputs: serde_json::Map<String, Value>,
    pub stage_usage: serde_json::Map<String, Value>,
    pub status: Option<FileStatus>,
}
