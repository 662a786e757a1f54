//! Cross-tier lessons: what earlier tiers learned, carried into later ones.
//!
//! Outlives the per-file states that feed it. Updates use the same reducer
//! discipline as every other state; the tier coordinator is the only writer
//! and folds file outcomes in one at a time.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::manager::{update, StateManager};
use crate::reducer::{MergePolicy, ReducerRegistry};
use crate::schema::{LessonField, SchemaField};

/// Summary of one finished tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSummary {
    pub files: usize,
    pub passed: usize,
    pub needs_review: usize,
    pub fix_rounds: u32,
}

#[derive(Debug, Clone)]
pub struct LessonsState {
    state: StateManager,
}

impl LessonsState {
    pub fn new(lessons_cap: usize) -> Self {
        let registry = ReducerRegistry::for_schema::<LessonField>()
            .with_policy(LessonField::Lessons, MergePolicy::AppendCapped(lessons_cap));
        Self {
            state: StateManager::new(Arc::new(registry), Default::default()),
        }
    }

    /// Append lessons learned (most recent kept when over the cap).
    pub fn record_lessons(&mut self, lessons: impl IntoIterator<Item = String>) {
        let lessons: Vec<Value> = lessons.into_iter().map(Value::String).collect();
        if lessons.is_empty() {
            return;
        }
        self.state.set(LessonField::Lessons, Value::Array(lessons));
    }

    /// Record a finished tier and the files it completed.
    pub fn record_tier(&mut self, tier: &str, summary: &TierSummary, completed: &[String]) {
        let summary = serde_json::to_value(summary).unwrap_or(Value::Null);
        self.state.apply_update(update([
            (LessonField::TierSummaries, json!({ tier: summary })),
            (LessonField::CompletedFiles, json!(completed)),
        ]));
    }

    /// Attach a free-form annotation.
    pub fn annotate(&mut self, key: &str, value: Value) {
        self.state.set(LessonField::Annotations, json!({ key: value }));
    }

    pub fn lessons(&self) -> Vec<String> {
        self.state.get_as(LessonField::Lessons).unwrap_or_default()
    }

    pub fn completed_files(&self) -> Vec<String> {
        self.state.get_as(LessonField::CompletedFiles).unwrap_or_default()
    }

    pub fn tier_summary(&self, tier: &str) -> Option<TierSummary> {
        self.state
            .get(LessonField::TierSummaries.name())
            .and_then(|v| v.get(tier))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.state
            .get(LessonField::Annotations.name())
            .and_then(|v| v.get(key))
    }
}
