//! Merge policies and the registry that maps field names to them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

use crate::schema::SchemaField;

/// How a new partial value combines with an existing field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "cap")]
pub enum MergePolicy {
    /// Last writer wins.
    Overwrite,
    /// Concatenate new elements after existing ones.
    Append,
    /// Append, then keep only the most recent `N` elements.
    AppendCapped(usize),
    /// Add new keys, overwrite colliding keys, keep keys only in the old value.
    ShallowMerge,
}

impl MergePolicy {
    /// Combine `old` and `new`. Never fails: a shape the policy cannot
    /// merge degrades to overwrite.
    pub fn reduce(self, old: Value, new: Value) -> Value {
        match (self, old, new) {
            (Self::Overwrite, _, new) => new,
            (Self::Append, Value::Array(mut old), Value::Array(new)) => {
                old.extend(new);
                Value::Array(old)
            }
            (Self::AppendCapped(cap), Value::Array(mut old), Value::Array(new)) => {
                old.extend(new);
                Value::Array(keep_last(old, cap))
            }
            (Self::ShallowMerge, Value::Object(mut old), Value::Object(new)) => {
                for (k, v) in new {
                    old.insert(k, v);
                }
                Value::Object(old)
            }
            (policy, _, new) => {
                trace!(?policy, "merge shape mismatch, overwriting");
                self.first_write(new)
            }
        }
    }

    /// Value stored when the field does not exist yet.
    pub fn first_write(self, new: Value) -> Value {
        match (self, new) {
            (Self::AppendCapped(cap), Value::Array(items)) => Value::Array(keep_last(items, cap)),
            (_, new) => new,
        }
    }
}

fn keep_last(mut items: Vec<Value>, cap: usize) -> Vec<Value> {
    if items.len() > cap {
        items.drain(..items.len() - cap);
    }
    items
}

/// Field name → merge policy, derived once from a schema's declarations.
///
/// Names with no registered policy are written with overwrite semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducerRegistry {
    policies: BTreeMap<String, MergePolicy>,
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from every field a schema declares.
    pub fn for_schema<F: SchemaField>() -> Self {
        let policies = F::ALL
            .iter()
            .map(|field| (field.name().to_string(), field.policy()))
            .collect();
        Self { policies }
    }

    /// Override one field's policy (e.g. a cap taken from configuration).
    pub fn with_policy(mut self, field: impl SchemaField, policy: MergePolicy) -> Self {
        self.policies.insert(field.name().to_string(), policy);
        self
    }

    pub fn policy(&self, name: &str) -> Option<MergePolicy> {
        self.policies.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
