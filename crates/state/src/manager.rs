//! The typed state manager: one field mapping per unit of work.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::reducer::ReducerRegistry;
use crate::schema::SchemaField;
use crate::scopes::RoleScope;

/// Field name → value.
pub type StateMap = serde_json::Map<String, Value>;

/// Owns the state of one file build (or one tier) and applies every
/// update through the reducer registry.
///
/// Not internally synchronized: callers serialize `apply_update` calls on
/// a shared instance.
#[derive(Debug, Clone)]
pub struct StateManager {
    registry: Arc<ReducerRegistry>,
    values: StateMap,
}

impl StateManager {
    /// Create a manager and write the initial mapping through the reducers.
    pub fn new(registry: Arc<ReducerRegistry>, initial: StateMap) -> Self {
        let mut manager = Self {
            registry,
            values: StateMap::new(),
        };
        manager.apply_update(initial);
        manager
    }

    /// Merge a partial mapping field by field.
    ///
    /// Registered fields that already exist go through their reducer;
    /// first writes and unknown keys are stored as given (capped fields are
    /// capped on first write). Never fails.
    pub fn apply_update(&mut self, update: StateMap) {
        for (key, new) in update {
            let policy = self.registry.policy(&key);
            let merged = match (policy, self.values.remove(&key)) {
                (Some(policy), Some(old)) => policy.reduce(old, new),
                (Some(policy), None) => policy.first_write(new),
                (None, _) => new,
            };
            self.values.insert(key, merged);
        }
    }

    /// Update a single declared field.
    pub fn set<F: SchemaField>(&mut self, field: F, value: Value) {
        let mut update = StateMap::new();
        update.insert(field.name().to_string(), value);
        self.apply_update(update);
    }

    /// Keys present in both the state and `keys`. Absent keys are omitted.
    pub fn scoped_read<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> StateMap {
        keys.into_iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.to_string(), v.clone())))
            .collect()
    }

    /// The read view a role is entitled to.
    pub fn view<F: SchemaField>(&self, scope: &RoleScope<F>) -> StateMap {
        self.scoped_read(scope.field_names())
    }

    /// A fully independent copy, used as a checkpoint before risky work.
    pub fn snapshot(&self) -> StateManager {
        self.clone()
    }

    /// Replace the current values with a checkpoint's.
    pub fn restore(&mut self, checkpoint: StateManager) {
        self.values = checkpoint.values;
    }

    /// A deep copy of the current mapping. Mutating it, nested lists and
    /// maps included, never reaches the manager.
    ///
    /// Use `apply_update` to change state.
    pub fn state(&self) -> StateMap {
        self.values.clone()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Read one declared field as a concrete type.
    pub fn get_as<F: SchemaField, T: DeserializeOwned>(&self, field: F) -> Option<T> {
        self.values
            .get(field.name())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Read the whole state as a typed record.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.values.clone()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build a `StateMap` from declared fields.
pub fn update<F: SchemaField>(entries: impl IntoIterator<Item = (F, Value)>) -> StateMap {
    entries
        .into_iter()
        .map(|(field, value)| (field.name().to_string(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::MergePolicy;
    use crate::schema::{FileBuildState, FileField, FileStatus};
    use serde_json::json;

    fn file_manager(initial: StateMap) -> StateManager {
        StateManager::new(Arc::new(ReducerRegistry::for_schema::<FileField>()), initial)
    }

    #[test]
    fn apply_update_merges_field_by_field() {
        let mut state = file_manager(update([
            (FileField::FilePath, json!("src/lib.rs")),
            (FileField::FixHistory, json!([{"round": 1}])),
            (FileField::StageOutputs, json!({"generate": "k1"})),
        ]));

        state.apply_update(update([
            (FileField::FixHistory, json!([{"round": 2}])),
            (FileField::StageOutputs, json!({"audit": "k2"})),
            (FileField::Status, FileStatus::Generated.as_value()),
        ]));

        assert_eq!(state.get("file_path"), Some(&json!("src/lib.rs")));
        assert_eq!(state.get("fix_history"), Some(&json!([{"round": 1}, {"round": 2}])));
        assert_eq!(state.get("stage_outputs"), Some(&json!({"generate": "k1", "audit": "k2"})));
        assert_eq!(state.get("status"), Some(&json!("generated")));
    }

    #[test]
    fn unknown_keys_are_added_with_overwrite() {
        let mut state = file_manager(StateMap::new());
        let mut u = StateMap::new();
        u.insert("surprise".into(), json!([1]));
        state.apply_update(u.clone());
        u.insert("surprise".into(), json!([2]));
        state.apply_update(u);
        assert_eq!(state.get("surprise"), Some(&json!([2])));
    }

    #[test]
    fn malformed_update_degrades_to_overwrite() {
        let mut state = file_manager(update([(FileField::FixHistory, json!([1]))]));
        state.set(FileField::FixHistory, json!("not a list"));
        assert_eq!(state.get("fix_history"), Some(&json!("not a list")));
    }

    #[test]
    fn capped_field_never_exceeds_cap() {
        let registry = ReducerRegistry::for_schema::<FileField>()
            .with_policy(FileField::Notes, MergePolicy::AppendCapped(3));
        let mut state = StateManager::new(Arc::new(registry), StateMap::new());
        for i in 0..7 {
            state.set(FileField::Notes, json!([format!("n{i}")]));
            assert!(state.get("notes").unwrap().as_array().unwrap().len() <= 3);
        }
        assert_eq!(state.get("notes"), Some(&json!(["n4", "n5", "n6"])));
    }

    #[test]
    fn merge_policies_hold_across_many_updates() {
        let registry = ReducerRegistry::for_schema::<FileField>()
            .with_policy(FileField::Notes, MergePolicy::AppendCapped(3));
        let mut state = StateManager::new(Arc::new(registry), StateMap::new());
        let mut appended: Vec<Value> = Vec::new();
        let mut outputs = serde_json::Map::new();

        for i in 0..12usize {
            let batch: Vec<Value> = (0..i % 5).map(|j| json!(format!("n{i}.{j}"))).collect();
            appended.extend(batch.iter().cloned());

            let mut merged = serde_json::Map::new();
            merged.insert(format!("stage{i}"), json!(i));
            if i >= 2 {
                merged.insert(format!("stage{}", i / 2), json!(format!("redo{i}")));
            }
            for (key, value) in &merged {
                outputs.insert(key.clone(), value.clone());
            }

            state.apply_update(update([
                (FileField::Notes, Value::Array(batch)),
                (FileField::StageOutputs, Value::Object(merged)),
            ]));

            let notes = state.get("notes").unwrap().as_array().unwrap();
            assert!(notes.len() <= 3, "step {i}: {notes:?}");
            let tail = &appended[appended.len().saturating_sub(3)..];
            assert_eq!(notes.as_slice(), tail, "step {i}");

            assert_eq!(state.get("stage_outputs"), Some(&Value::Object(outputs.clone())), "step {i}");
        }
        assert_eq!(outputs.len(), 12);
        assert_eq!(outputs["stage5"], json!("redo11"));
    }

    #[test]
    fn scoped_read_returns_only_requested_present_keys() {
        let state = file_manager(update([
            (FileField::FilePath, json!("a.rs")),
            (FileField::GeneratedContent, json!("fn main() {}")),
        ]));
        let view = state.scoped_read(["file_path", "findings", "not_a_field"]);
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("file_path"), Some(&json!("a.rs")));
    }

    #[test]
    fn snapshot_is_independent() {
        let mut state = file_manager(update([(FileField::FixHistory, json!([1]))]));
        let checkpoint = state.snapshot();
        state.set(FileField::FixHistory, json!([2]));
        assert_eq!(checkpoint.get("fix_history"), Some(&json!([1])));

        state.restore(checkpoint);
        assert_eq!(state.get("fix_history"), Some(&json!([1])));
    }

    #[test]
    fn state_copy_does_not_leak_mutations() {
        let state = file_manager(update([(FileField::FindingHistory, json!([1]))]));
        let mut copy = state.state();
        copy.insert("file_path".into(), json!("x"));
        if let Some(Value::Array(items)) = copy.get_mut("finding_history") {
            items.push(json!(2));
        }
        assert!(state.get("file_path").is_none());
        assert_eq!(state.get("finding_history"), Some(&json!([1])));
    }

    #[test]
    fn typed_read() {
        let state = file_manager(update([
            (FileField::FilePath, json!("src/main.rs")),
            (FileField::FixRounds, json!(2)),
            (FileField::Status, FileStatus::Passed.as_value()),
        ]));
        let typed: FileBuildState = state.typed().unwrap();
        assert_eq!(typed.file_path, "src/main.rs");
        assert_eq!(typed.fix_rounds, 2);
        assert_eq!(typed.status, Some(FileStatus::Passed));
        assert_eq!(state.get_as::<_, u32>(FileField::FixRounds), Some(2));
    }
}
