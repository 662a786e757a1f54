//! The agent loop and the build pipeline built on it.
//!
//! Every pipeline role (planner, builder, fixer, auditor) runs the same
//! bounded loop:
//!
//! 1. **Send** the system prompt, action schemas and full history
//! 2. **Dispatch** every action the reasoning service requests
//! 3. **Feed back** each result, including validation errors
//! 4. **Stop** when the role's terminal action accepts an artifact, or
//!    fail at the turn ceiling
//!
//! [`BuildPipeline`] sequences those loops over a plan's tiers and moves
//! context between them through handoff filters.

pub mod actions;
pub mod dispatch;
pub mod loop_runner;
pub mod observer;
pub mod pipeline;
pub mod roles;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use actions::{FetchContractAction, NoteAction, ReadStateAction, StaticContracts, SubmitArtifactAction};
pub use dispatch::ActionDispatcher;
pub use loop_runner::{AgentLoop, LoopError, LoopOutcome};
pub use observer::{ActionSummary, TurnObserver, TurnReport};
pub use pipeline::{
    AuditResult, BuildPipeline, BuildReport, BuildStatus, FileReport, PipelineError, PlanResult,
    TierReport, artifact_key,
};
pub use roles::PipelineRole;
