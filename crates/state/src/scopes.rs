//! Role read scopes: what each pipeline role may observe of a file's state.
//!
//! Scopes are fixed constants. A role never sees a field outside its
//! scope, even when the field exists in the shared state. Pipeline order is
//! builder → auditor → fixer → reporter; a scope only names fields written
//! before its role's turn, except `findings`, which is fed back to the fixer.

use crate::schema::{FileField, SchemaField};

/// A named, fixed set of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleScope<F: 'static> {
    role: &'static str,
    fields: &'static [F],
}

impl<F: SchemaField> RoleScope<F> {
    pub const fn new(role: &'static str, fields: &'static [F]) -> Self {
        Self { role, fields }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn fields(&self) -> &'static [F] {
        self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name())
    }

    pub fn contains(&self, field: F) -> bool {
        self.fields.contains(&field)
    }
}

/// Generates the first draft of a file.
pub const BUILDER_SCOPE: RoleScope<FileField> = RoleScope::new(
    "builder",
    &[
        FileField::FilePath,
        FileField::Phase,
        FileField::FileSpec,
        FileField::Stack,
        FileField::AcceptanceCriteria,
        FileField::Lessons,
    ],
);

/// Judges generated content independently of the builder's reasoning.
pub const AUDITOR_SCOPE: RoleScope<FileField> = RoleScope::new(
    "auditor",
    &[
        FileField::FilePath,
        FileField::Phase,
        FileField::FileSpec,
        FileField::Stack,
        FileField::AcceptanceCriteria,
        FileField::GeneratedContent,
    ],
);

/// Repairs content against the auditor's findings.
pub const FIXER_SCOPE: RoleScope<FileField> = RoleScope::new(
    "fixer",
    &[
        FileField::FilePath,
        FileField::Phase,
        FileField::FileSpec,
        FileField::Stack,
        FileField::AcceptanceCriteria,
        FileField::Lessons,
        FileField::GeneratedContent,
        FileField::Findings,
        FileField::FixHistory,
    ],
);

/// Summarizes a finished file into lessons and the build report.
pub const REPORTER_SCOPE: RoleScope<FileField> = RoleScope::new(
    "reporter",
    &[
        FileField::FilePath,
        FileField::Phase,
        FileField::AuditStatus,
        FileField::Findings,
        FileField::FindingHistory,
        FileField::FixHistory,
        FileField::FixRounds,
        FileField::Notes,
        FileField::StageOutputs,
        FileField::StageUsage,
        FileField::Status,
    ],
);

pub const ALL_SCOPES: [RoleScope<FileField>; 4] =
    [BUILDER_SCOPE, AUDITOR_SCOPE, FIXER_SCOPE, REPORTER_SCOPE];
