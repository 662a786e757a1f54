//! Conversation history domain types.
//!
//! One loop run exchanges turns with the reasoning service:
//! the requester writes instructions, the responder narrates and requests
//! actions, and the loop answers every requested action with a result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions authored by the loop (initial request, corrections)
    User,
    /// The reasoning service
    Assistant,
    /// Results of requested actions
    Tool,
}

/// An action requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    /// Call ID assigned by the reasoning service
    pub id: String,

    /// Name of the action to run
    pub name: String,

    /// Structured inputs
    #[serde(default)]
    pub input: serde_json::Value,
}

/// The result of one action call, fed back on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// The call ID this result answers
    pub call_id: String,

    /// Result payload, serialized as JSON text for the service
    pub content: String,

    /// Whether the action failed
    #[serde(default)]
    pub is_error: bool,
}

impl ActionResult {
    /// Build a result from a structured mapping.
    pub fn from_value(call_id: impl Into<String>, value: &serde_json::Value, is_error: bool) -> Self {
        Self {
            call_id: call_id.into(),
            content: value.to_string(),
            is_error,
        }
    }

    /// Build an error result carrying a single message.
    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        let value = serde_json::json!({ "error": message.into() });
        Self::from_value(call_id, &value, true)
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who authored this turn
    pub role: Role,

    /// Narration or instruction text. For `Tool` turns this is an optional
    /// instruction that follows the results.
    pub content: String,

    /// Actions requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_calls: Vec<ActionCall>,

    /// Results answering the previous assistant turn (Tool turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_results: Vec<ActionResult>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            action_calls: Vec::new(),
            action_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a requester-authored instruction turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a responder-authored turn without actions.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a responder-authored turn requesting actions.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ActionCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.action_calls = calls;
        msg
    }

    /// Create an action-result turn, optionally followed by an instruction.
    pub fn action_results(results: Vec<ActionResult>, instruction: Option<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, instruction.unwrap_or_default());
        msg.action_results = results;
        msg
    }
}

/// Ordered turns for one loop invocation. Append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Start a history with the initial instruction turn.
    pub fn new(initial_instruction: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(initial_instruction)],
        }
    }

    /// Append a turn.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Every action call requested across the run, in order.
    pub fn action_calls(&self) -> impl Iterator<Item = &ActionCall> {
        self.messages.iter().flat_map(|m| m.action_calls.iter())
    }

    /// The most recent non-empty narration from the assistant.
    pub fn last_narration(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .find(|c| !c.trim().is_empty())
    }
}
