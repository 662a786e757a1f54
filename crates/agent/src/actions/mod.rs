//! Built-in action handlers.
//!
//! Non-terminal actions give a role read access to what it needs. Terminal
//! `submit_*` actions validate, stamp and persist the role's artifact.

pub mod fetch_contract;
pub mod note;
pub mod read_state;
pub mod submit;

pub use fetch_contract::{FetchContractAction, StaticContracts};
pub use note::NoteAction;
pub use read_state::ReadStateAction;
pub use submit::SubmitArtifactAction;
