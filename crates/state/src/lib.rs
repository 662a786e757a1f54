//! Typed shared state for the build pipeline.
//!
//! Per-file and cross-tier state live in [`StateManager`]s whose updates
//! always go through declared merge policies. Roles read state only through
//! fixed [`RoleScope`]s, and context crossing a stage boundary passes
//! through composable [`handoff`] filters.

pub mod handoff;
pub mod lessons;
pub mod manager;
pub mod reducer;
pub mod schema;
pub mod scopes;

pub use handoff::{BoundaryFilters, HandoffBundle, HandoffFilter};
pub use lessons::{LessonsState, TierSummary};
pub use manager::{update, StateManager, StateMap};
pub use reducer::{MergePolicy, ReducerRegistry};
pub use schema::{
    FileBuildState, FileField, FileStatus, LessonField, SchemaField, DEFAULT_LESSONS_CAP,
    DEFAULT_NOTES_CAP,
};
pub use scopes::{RoleScope, AUDITOR_SCOPE, BUILDER_SCOPE, FIXER_SCOPE, REPORTER_SCOPE};
