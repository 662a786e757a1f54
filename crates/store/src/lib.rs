//! Artifact store implementations for buildloop.
//!
//! Both backends implement `buildloop_core::ArtifactStore`: a flat
//! collection/key → JSON document mapping. Schema versioning travels inside
//! each document's `metadata`, never in the store itself.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

use buildloop_core::StoreError;

/// Reject keys and collections that could escape the store root.
pub(crate) fn check_key(collection: &str, key: &str) -> Result<(), StoreError> {
    for part in [collection, key] {
        check_part(part).map_err(|reason| invalid(collection, key, reason))?;
    }
    Ok(())
}

/// Reject a collection name that could escape the store root.
pub(crate) fn check_collection(collection: &str) -> Result<(), StoreError> {
    check_part(collection).map_err(|reason| invalid(collection, "", reason))
}

fn check_part(part: &str) -> Result<(), &'static str> {
    if part.is_empty() {
        return Err("empty names are not allowed");
    }
    if part.contains(['/', '\\']) || part == "." || part == ".." {
        return Err("path separators are not allowed");
    }
    Ok(())
}

fn invalid(collection: &str, key: &str, reason: &str) -> StoreError {
    StoreError::InvalidKey {
        collection: collection.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
