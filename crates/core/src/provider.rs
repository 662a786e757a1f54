//! Provider trait: the abstraction over the reasoning service.
//!
//! A Provider takes segmented system instructions, the action schemas and
//! the full turn history, and returns one responder turn together with a
//! stop indicator and usage deltas. The loop never knows which backend it
//! is talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// One segment of the system instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSegment {
    pub text: String,

    /// Marks the cache boundary: everything up to and including this
    /// segment may be reused across calls.
    #[serde(default)]
    pub cache_boundary: bool,
}

/// Segmented system instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub segments: Vec<PromptSegment>,
}

impl SystemPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment that is stable across calls and should be cached.
    pub fn cached(mut self, text: impl Into<String>) -> Self {
        // Only the last cached segment carries the boundary marker.
        for seg in &mut self.segments {
            seg.cache_boundary = false;
        }
        self.segments.push(PromptSegment {
            text: text.into(),
            cache_boundary: true,
        });
        self
    }

    /// Append a per-run segment after the cache boundary.
    pub fn dynamic(mut self, text: impl Into<String>) -> Self {
        self.segments.push(PromptSegment {
            text: text.into(),
            cache_boundary: false,
        });
        self
    }

    /// Flattened text, used for logging and size estimates.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// An action schema sent to the service so it knows what it can request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// The action name
    pub name: String,

    /// Description of what the action does
    pub description: String,

    /// JSON Schema describing the action's inputs
    pub parameters: serde_json::Value,
}

/// A request for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// Segmented system instructions
    pub system: SystemPrompt,

    /// Full turn history
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Actions the service may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDefinition>,
}

fn default_temperature() -> f32 {
    0.2
}

/// Why the service stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Conversation turn ended naturally
    EndTurn,
    /// The service is waiting for action results
    ToolUse,
    /// Output hit the token limit and is incomplete
    MaxTokens,
    /// A stop sequence was produced
    StopSequence,
    /// Anything else the backend reports
    Other(String),
}

impl StopReason {
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::MaxTokens)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => write!(f, "end_turn"),
            Self::ToolUse => write!(f, "tool_use"),
            Self::MaxTokens => write!(f, "max_tokens"),
            Self::StopSequence => write!(f, "stop_sequence"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Token usage reported for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

/// Running sums of usage across all turns of one loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl UsageTotals {
    /// Add one turn's deltas.
    pub fn accumulate(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_write_tokens += usage.cache_write_tokens;
    }

    /// Fold another run's totals into this one.
    pub fn merge(&mut self, other: &UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One responder turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The assistant turn (narration + requested actions)
    pub message: Message,

    /// Stop indicator
    pub stop_reason: StopReason,

    /// Usage deltas for this turn
    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded
    pub model: String,
}

/// The core Provider trait.
///
/// Every reasoning backend implements this trait. The loop calls
/// `complete()` once per turn and owns everything else.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send one turn and get the complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}
