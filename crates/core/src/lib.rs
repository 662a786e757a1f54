//! # buildloop core
//!
//! Domain types, traits, and error definitions for the buildloop agent
//! pipeline. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! Each external collaborator is a trait here: the reasoning service
//! ([`Provider`]), artifact persistence ([`ArtifactStore`]) and contract
//! lookup ([`ContractFetcher`]). Implementations live in their own crates,
//! and tests swap in scripted stand-ins.

pub mod action;
pub mod artifact;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use action::{ActionHandler, ActionName, ActionOutcome};
pub use artifact::{Artifact, ArtifactKind, ArtifactStore, ContractFetcher};
pub use error::{ActionError, ProviderError, StoreError};
pub use message::{ActionCall, ActionResult, ConversationHistory, Message, Role};
pub use provider::{
    ActionDefinition, PromptSegment, Provider, ProviderRequest, ProviderResponse, StopReason,
    SystemPrompt, Usage, UsageTotals,
};

/// Cooperative cancellation, polled by the loop at turn boundaries.
pub use tokio_util::sync::CancellationToken;
