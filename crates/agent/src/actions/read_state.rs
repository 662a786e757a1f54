//! Read access to the role's scoped view of the file's shared state.

use async_trait::async_trait;
use buildloop_core::{ActionHandler, ActionName, ActionOutcome};
use buildloop_state::StateMap;
use serde_json::{Value, json};

/// Serves a view captured when the loop was set up. The file's state is
/// not written while one of its loops runs, so the view stays current.
pub struct ReadStateAction {
    view: StateMap,
}

impl ReadStateAction {
    pub fn new(view: StateMap) -> Self {
        Self { view }
    }
}

#[async_trait]
impl ActionHandler for ReadStateAction {
    fn action(&self) -> ActionName {
        ActionName::ReadState
    }

    fn description(&self) -> &str {
        "Read fields of the current file's build state. Omit 'fields' to read everything visible to you."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fields": {
                    "type": "array",
                    "items": { "type": "string", "enum": self.view.keys().collect::<Vec<_>>() },
                    "description": "Field names to read"
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> ActionOutcome {
        let Some(fields) = input.get("fields").filter(|f| !f.is_null()) else {
            return ActionOutcome::Output(Value::Object(self.view.clone()));
        };
        let Some(fields) = fields.as_array() else {
            return ActionOutcome::error("'fields' must be a list of field names");
        };

        let mut out = StateMap::new();
        let mut unavailable = Vec::new();
        for field in fields {
            match field.as_str().and_then(|name| self.view.get_key_value(name)) {
                Some((name, value)) => {
                    out.insert(name.clone(), value.clone());
                }
                None => unavailable.push(field.clone()),
            }
        }

        if !unavailable.is_empty() {
            out.insert("unavailable".into(), Value::Array(unavailable));
        }
        ActionOutcome::Output(Value::Object(out))
    }
}
