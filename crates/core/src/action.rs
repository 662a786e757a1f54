//! Action handlers: what the reasoning service can ask the loop to do.
//!
//! Action names form a closed set. Each role registers one handler per
//! name it exposes; a typo in a requested name is answered with a
//! structured error instead of being silently ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use crate::artifact::Artifact;
use crate::error::ActionError;
use crate::provider::ActionDefinition;

/// Every action the pipeline knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    FetchContract,
    ReadState,
    Note,
    SubmitPlan,
    SubmitVerdict,
    SubmitFile,
}

impl ActionName {
    pub const ALL: [ActionName; 6] = [
        Self::FetchContract,
        Self::ReadState,
        Self::Note,
        Self::SubmitPlan,
        Self::SubmitVerdict,
        Self::SubmitFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchContract => "fetch_contract",
            Self::ReadState => "read_state",
            Self::Note => "note",
            Self::SubmitPlan => "submit_plan",
            Self::SubmitVerdict => "submit_verdict",
            Self::SubmitFile => "submit_file",
        }
    }

    /// Terminal actions end a loop run when they succeed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SubmitPlan | Self::SubmitVerdict | Self::SubmitFile)
    }
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionName {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ActionError::Unknown(s.to_string()))
    }
}

/// What running an action produced.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Non-terminal success with a result mapping.
    Output(serde_json::Value),
    /// Non-terminal failure with a result mapping.
    Failed(serde_json::Value),
    /// Terminal action accepted; the run produced its artifact.
    Completed(Artifact),
    /// Terminal action refused by schema validation.
    Rejected(Vec<String>),
}

impl ActionOutcome {
    /// Shorthand for `Failed({"error": message})`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Failed(serde_json::json!({ "error": message.into() }))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Rejected(_))
    }
}

/// One handler per action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Which action this handler serves.
    fn action(&self) -> ActionName;

    /// A description of what this action does (sent to the service).
    fn description(&self) -> &str;

    /// JSON Schema describing this action's inputs.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the action. Handlers report failures through the outcome and
    /// never panic on malformed input.
    async fn execute(&self, input: serde_json::Value) -> ActionOutcome;

    /// Convert this handler into a definition for the service.
    fn to_definition(&self) -> ActionDefinition {
        ActionDefinition {
            name: self.action().as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }
}
