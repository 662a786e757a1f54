//! Handoff filters: pure transforms applied to the context passed from one
//! stage to the next.
//!
//! A filter takes a [`HandoffBundle`] and returns one of the same shape. It
//! never fails. Composite filters are assembled once per stage boundary and
//! reused for every handoff across it.

use buildloop_core::ActionCall;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::manager::StateMap;

/// Appended to any string cut by [`truncate_strings`].
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Context crossing a stage boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffBundle {
    /// Prior role's scoped view of the shared state.
    pub shared_state: StateMap,
    /// Prior stage's structured output.
    pub raw_output: StateMap,
    /// Actions the prior stage requested.
    pub action_log: Vec<ActionCall>,
    /// Prior stage's free-text narration.
    pub narration: String,
}

/// A pure `bundle → bundle` transform.
pub type HandoffFilter = Arc<dyn Fn(HandoffBundle) -> HandoffBundle + Send + Sync>;

/// Pass the bundle through unchanged.
pub fn identity() -> HandoffFilter {
    Arc::new(|bundle| bundle)
}

/// Apply filters in order: `compose([f1, f2])(b) == f2(f1(b))`.
pub fn compose(filters: Vec<HandoffFilter>) -> HandoffFilter {
    Arc::new(move |bundle| filters.iter().fold(bundle, |bundle, filter| filter(bundle)))
}

/// Drop the action-call log.
pub fn strip_tool_calls() -> HandoffFilter {
    Arc::new(|mut bundle: HandoffBundle| {
        bundle.action_log.clear();
        bundle
    })
}

/// Drop free-text narration.
pub fn strip_raw_text() -> HandoffFilter {
    Arc::new(|mut bundle: HandoffBundle| {
        bundle.narration.clear();
        bundle
    })
}

/// Cap every string-valued field of the raw output at `max_chars`
/// characters, appending [`TRUNCATION_MARKER`] to any that were cut.
pub fn truncate_strings(max_chars: usize) -> HandoffFilter {
    Arc::new(move |mut bundle: HandoffBundle| {
        for value in bundle.raw_output.values_mut() {
            if let Value::String(text) = value
                && let Some(cut) = truncate(text, max_chars)
            {
                *text = cut;
            }
        }
        bundle
    })
}

fn truncate(text: &str, max_chars: usize) -> Option<String> {
    let (byte_end, _) = text.char_indices().nth(max_chars)?;
    let mut cut = String::with_capacity(byte_end + TRUNCATION_MARKER.len());
    cut.push_str(&text[..byte_end]);
    cut.push_str(TRUNCATION_MARKER);
    Some(cut)
}

/// The composite filter for each boundary of the per-file pipeline.
#[derive(Clone)]
pub struct BoundaryFilters {
    /// Builder → auditor. The auditor judges output, not the builder's reasoning.
    pub generate_to_audit: HandoffFilter,
    /// Auditor → fixer. Findings survive, the auditor's trace does not.
    pub audit_to_fix: HandoffFilter,
    /// Fixer → auditor, for the re-audit.
    pub fix_to_audit: HandoffFilter,
}

impl BoundaryFilters {
    pub fn new(max_chars: usize) -> Self {
        Self {
            generate_to_audit: compose(vec![
                strip_tool_calls(),
                strip_raw_text(),
                truncate_strings(max_chars),
            ]),
            audit_to_fix: compose(vec![strip_tool_calls(), truncate_strings(max_chars)]),
            fix_to_audit: compose(vec![strip_tool_calls(), strip_raw_text()]),
        }
    }
}

impl fmt::Debug for BoundaryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundaryFilters").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> HandoffBundle {
        let mut shared_state = StateMap::new();
        shared_state.insert("file_path".into(), json!("src/lib.rs"));
        let mut raw_output = StateMap::new();
        raw_output.insert("content".into(), json!("abcdefghij"));
        raw_output.insert("lines".into(), json!(10));
        HandoffBundle {
            shared_state,
            raw_output,
            action_log: vec![ActionCall {
                id: "call_1".into(),
                name: "note".into(),
                input: json!({"text": "thinking"}),
            }],
            narration: "I will write the file now.".into(),
        }
    }

    #[test]
    fn compose_strips_log_and_narration_only() {
        let original = bundle();
        let filter = compose(vec![strip_tool_calls(), strip_raw_text()]);
        let out = filter(original.clone());

        assert!(out.action_log.is_empty());
        assert!(out.narration.is_empty());
        assert_eq!(out.shared_state, original.shared_state);
        assert_eq!(out.raw_output, original.raw_output);
    }

    #[test]
    fn compose_applies_in_order() {
        let mark = |suffix: &'static str| -> HandoffFilter {
            Arc::new(move |mut b: HandoffBundle| {
                b.narration.push_str(suffix);
                b
            })
        };
        let out = compose(vec![mark("1"), mark("2"), mark("3")])(HandoffBundle::default());
        assert_eq!(out.narration, "123");
    }

    #[test]
    fn empty_compose_is_identity() {
        let original = bundle();
        assert_eq!(compose(Vec::new())(original.clone()), original);
        assert_eq!(identity()(original.clone()), original);
    }

    #[test]
    fn truncate_caps_strings_and_marks_them() {
        let out = truncate_strings(4)(bundle());
        assert_eq!(
            out.raw_output.get("content"),
            Some(&json!(format!("abcd{TRUNCATION_MARKER}")))
        );
        assert_eq!(out.raw_output.get("lines"), Some(&json!(10)));
        assert_eq!(out.shared_state, bundle().shared_state);
    }

    #[test]
    fn truncate_leaves_short_strings_alone() {
        let out = truncate_strings(10)(bundle());
        assert_eq!(out.raw_output.get("content"), Some(&json!("abcdefghij")));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut b = HandoffBundle::default();
        b.raw_output.insert("text".into(), json!("héllo wörld"));
        let out = truncate_strings(2)(b);
        assert_eq!(out.raw_output.get("text"), Some(&json!(format!("hé{TRUNCATION_MARKER}"))));
    }

    #[test]
    fn generate_to_audit_hides_builder_reasoning() {
        let filters = BoundaryFilters::new(3);
        let out = (filters.generate_to_audit)(bundle());
        assert!(out.action_log.is_empty());
        assert!(out.narration.is_empty());
        assert_eq!(
            out.raw_output.get("content"),
            Some(&json!(format!("abc{TRUNCATION_MARKER}")))
        );
    }

    #[test]
    fn audit_to_fix_keeps_narration() {
        let filters = BoundaryFilters::new(100);
        let out = (filters.audit_to_fix)(bundle());
        assert!(out.action_log.is_empty());
        assert_eq!(out.narration, "I will write the file now.");
    }
}
