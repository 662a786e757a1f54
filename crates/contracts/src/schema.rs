//! Structural validation of artifact documents.
//!
//! Each artifact kind is described by a static table of [`FieldSpec`]s. The
//! validator walks an untrusted JSON document against its table and collects
//! every problem as a `"<dotted.path>: <message>"` string, e.g.
//! `phases.0.file_manifest.1.path: field required`. It never panics, and the
//! same document always produces the same list in the same order.

use serde_json::{Map, Value};
use std::collections::HashSet;

use buildloop_core::ArtifactKind;

use crate::metadata::METADATA_FIELD;
use crate::model::{AuditStatus, PhaseStatus, PlanMode, Severity};

/// Shape a field's value must have.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Any string.
    Text,
    /// A string with at least one non-whitespace character.
    NonEmptyText,
    /// One of a fixed set of strings.
    Enum(&'static [&'static str]),
    /// A list of strings.
    TextList,
    /// A nested record.
    Record(&'static [FieldSpec]),
    /// A list of nested records with at least `min_items` entries.
    RecordList {
        fields: &'static [FieldSpec],
        min_items: usize,
    },
    /// Any object; contents are not inspected.
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind, required: true }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind, required: false }
}

const METADATA: FieldSpec = optional(METADATA_FIELD, FieldKind::Object);

const STACK_FIELDS: &[FieldSpec] = &[
    required("language", FieldKind::NonEmptyText),
    optional("framework", FieldKind::Text),
    optional("dependencies", FieldKind::TextList),
];

const FILE_ENTRY_FIELDS: &[FieldSpec] = &[
    required("path", FieldKind::NonEmptyText),
    required("purpose", FieldKind::NonEmptyText),
    optional("depends_on", FieldKind::TextList),
];

const CRITERION_FIELDS: &[FieldSpec] = &[
    required("description", FieldKind::NonEmptyText),
    required("severity", FieldKind::Enum(Severity::VALUES)),
];

const PHASE_FIELDS: &[FieldSpec] = &[
    required("name", FieldKind::NonEmptyText),
    required("description", FieldKind::Text),
    required(
        "file_manifest",
        FieldKind::RecordList { fields: FILE_ENTRY_FIELDS, min_items: 1 },
    ),
    required(
        "acceptance_criteria",
        FieldKind::RecordList { fields: CRITERION_FIELDS, min_items: 0 },
    ),
    optional("status", FieldKind::Enum(PhaseStatus::VALUES)),
];

/// Fields of a [`crate::BuildPlan`].
pub const PLAN_FIELDS: &[FieldSpec] = &[
    required("summary", FieldKind::NonEmptyText),
    required("mode", FieldKind::Enum(PlanMode::VALUES)),
    required("stack", FieldKind::Record(STACK_FIELDS)),
    required("phases", FieldKind::RecordList { fields: PHASE_FIELDS, min_items: 1 }),
    METADATA,
];

const FINDING_FIELDS: &[FieldSpec] = &[
    required("severity", FieldKind::Enum(Severity::VALUES)),
    required("rule", FieldKind::NonEmptyText),
    required("message", FieldKind::NonEmptyText),
    optional("path", FieldKind::Text),
];

/// Fields of a [`crate::AuditVerdict`].
pub const VERDICT_FIELDS: &[FieldSpec] = &[
    required("status", FieldKind::Enum(AuditStatus::VALUES)),
    required("summary", FieldKind::Text),
    optional("findings", FieldKind::RecordList { fields: FINDING_FIELDS, min_items: 0 }),
    METADATA,
];

/// Fields of a [`crate::GeneratedFileRecord`].
pub const FILE_RECORD_FIELDS: &[FieldSpec] = &[
    required("path", FieldKind::NonEmptyText),
    required("content", FieldKind::Text),
    optional("notes", FieldKind::TextList),
    METADATA,
];

/// Validate a document of the given kind. An empty list means valid.
pub fn validate(kind: ArtifactKind, document: &Value) -> Vec<String> {
    match kind {
        ArtifactKind::Plan => validate_plan(document),
        ArtifactKind::AuditVerdict => validate_verdict(document),
        ArtifactKind::GeneratedFile => validate_file_record(document),
    }
}

/// Structural checks, then manifest consistency: unique paths, and
/// `depends_on` naming only files from the same or an earlier phase.
pub fn validate_plan(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check_record(document, PLAN_FIELDS, "", &mut errors);
    if errors.is_empty() {
        check_manifest(document, &mut errors);
    }
    errors
}

pub fn validate_verdict(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check_record(document, VERDICT_FIELDS, "", &mut errors);
    if errors.is_empty()
        && document["status"] == "fail"
        && document["findings"].as_array().is_none_or(|f| f.is_empty())
    {
        errors.push("findings: a failing verdict must list at least one finding".to_string());
    }
    errors
}

pub fn validate_file_record(document: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check_record(document, FILE_RECORD_FIELDS, "", &mut errors);
    errors
}

fn join(path: &str, segment: impl std::fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn located(path: &str) -> &str {
    if path.is_empty() { "document" } else { path }
}

fn check_record(value: &Value, fields: &[FieldSpec], path: &str, errors: &mut Vec<String>) {
    let Some(map) = value.as_object() else {
        errors.push(format!("{}: expected an object, got {}", located(path), type_name(value)));
        return;
    };

    for spec in fields {
        let field_path = join(path, spec.name);
        match map.get(spec.name) {
            None | Some(Value::Null) if spec.required => {
                errors.push(format!("{field_path}: field required"));
            }
            None | Some(Value::Null) => {}
            Some(value) => check_field(value, spec.kind, &field_path, errors),
        }
    }

    check_extra_fields(map, fields, path, errors);
}

fn check_extra_fields(
    map: &Map<String, Value>,
    fields: &[FieldSpec],
    path: &str,
    errors: &mut Vec<String>,
) {
    for key in map.keys() {
        if !fields.iter().any(|spec| spec.name == key) {
            errors.push(format!("{}: extra fields not permitted", join(path, key)));
        }
    }
}

fn check_field(value: &Value, kind: FieldKind, path: &str, errors: &mut Vec<String>) {
    match kind {
        FieldKind::Text => {
            if !value.is_string() {
                errors.push(format!("{path}: expected a string, got {}", type_name(value)));
            }
        }
        FieldKind::NonEmptyText => match value.as_str() {
            Some(text) if text.trim().is_empty() => {
                errors.push(format!("{path}: must not be empty"));
            }
            Some(_) => {}
            None => errors.push(format!("{path}: expected a string, got {}", type_name(value))),
        },
        FieldKind::Enum(allowed) => match value.as_str() {
            Some(text) if allowed.contains(&text) => {}
            Some(text) => errors.push(format!(
                "{path}: '{text}' is not one of [{}]",
                allowed.join(", ")
            )),
            None => errors.push(format!("{path}: expected a string, got {}", type_name(value))),
        },
        FieldKind::TextList => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(format!(
                            "{}: expected a string, got {}",
                            join(path, i),
                            type_name(item)
                        ));
                    }
                }
            }
            None => errors.push(format!("{path}: expected a list, got {}", type_name(value))),
        },
        FieldKind::Record(fields) => check_record(value, fields, path, errors),
        FieldKind::RecordList { fields, min_items } => match value.as_array() {
            Some(items) => {
                if items.len() < min_items {
                    errors.push(format!("{path}: expected at least {min_items} item(s)"));
                }
                for (i, item) in items.iter().enumerate() {
                    check_record(item, fields, &join(path, i), errors);
                }
            }
            None => errors.push(format!("{path}: expected a list, got {}", type_name(value))),
        },
        FieldKind::Object => {
            if !value.is_object() {
                errors.push(format!("{path}: expected an object, got {}", type_name(value)));
            }
        }
    }
}

fn check_manifest(document: &Value, errors: &mut Vec<String>) {
    let Some(phases) = document["phases"].as_array() else {
        return;
    };

    let mut seen: HashSet<&str> = HashSet::new();
    for (p, phase) in phases.iter().enumerate() {
        let Some(files) = phase["file_manifest"].as_array() else {
            continue;
        };
        let paths: Vec<&str> = files.iter().filter_map(|f| f["path"].as_str()).collect();

        for (f, file) in files.iter().enumerate() {
            let file_path = format!("phases.{p}.file_manifest.{f}");
            let Some(path) = file["path"].as_str() else {
                continue;
            };
            if !seen.insert(path) {
                errors.push(format!("{file_path}.path: duplicate file '{path}'"));
            }
            let deps = file["depends_on"].as_array().map(Vec::as_slice).unwrap_or_default();
            for (d, dep) in deps.iter().enumerate() {
                let Some(dep) = dep.as_str() else { continue };
                if dep == path {
                    errors.push(format!("{file_path}.depends_on.{d}: file depends on itself"));
                } else if !seen.contains(dep) && !paths.contains(&dep) {
                    errors.push(format!(
                        "{file_path}.depends_on.{d}: '{dep}' is not planned in this or an earlier phase"
                    ));
                }
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
