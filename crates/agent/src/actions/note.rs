//! Scratch notes: lets the model think out loud without side effects.

use async_trait::async_trait;
use buildloop_core::{ActionHandler, ActionName, ActionOutcome};
use serde_json::{Value, json};

pub struct NoteAction;

#[async_trait]
impl ActionHandler for NoteAction {
    fn action(&self) -> ActionName {
        ActionName::Note
    }

    fn description(&self) -> &str {
        "Record a short working note. Has no effect besides acknowledging it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "The note" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value) -> ActionOutcome {
        match input["text"].as_str() {
            Some(text) => ActionOutcome::Output(json!({ "status": "noted", "chars": text.chars().count() })),
            None => ActionOutcome::error("missing required field 'text'"),
        }
    }
}
