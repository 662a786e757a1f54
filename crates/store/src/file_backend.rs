//! File-based store: one pretty-printed JSON file per document.
//!
//! Layout: `<root>/<collection>/<key>.json`. Directories are created on
//! first write. Documents are human-inspectable and diff-friendly.

use async_trait::async_trait;
use buildloop_core::{ArtifactStore, StoreError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory-backed artifact store.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "File store opened");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, collection: &str, key: &str) -> PathBuf {
        self.root.join(collection).join(format!("{key}.json"))
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(
        &self,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError> {
        crate::check_key(collection, key)?;
        let path = self.path_for(collection, key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize document: {e}")))?;

        tokio::fs::write(&path, content).await.map_err(|e| {
            StoreError::Storage(format!("Failed to write {}: {e}", path.display()))
        })?;

        debug!(collection, key, "Document stored");
        Ok(())
    }

    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        crate::check_key(collection, key)?;
        let path = self.path_for(collection, key);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            warn!(collection, key, error = %e, "Corrupted document");
            StoreError::Corrupted {
                collection: collection.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn keys(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        crate::check_collection(collection)?;
        let dir = self.root.join(collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("Failed to list {}: {e}", dir.display()))),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem()
            {
                keys.push(stem.to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
