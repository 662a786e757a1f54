//! `buildloop validate`: check a JSON document against its schema offline.

use std::path::Path;

use buildloop_contracts as contracts;
use buildloop_core::ArtifactKind;

pub fn run(path: &Path, kind: ArtifactKind) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {} as {kind}...", path.display());

    let errors = check(path, kind)?;
    if errors.is_empty() {
        println!("   ✅ Valid {kind}");
        return Ok(());
    }

    for error in &errors {
        println!("   ❌ {error}");
    }
    Err(format!("{} validation error(s) in {}", errors.len(), path.display()).into())
}

/// Structural errors in the document at `path`, as dotted paths.
fn check(path: &Path, kind: ArtifactKind) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("{} is not JSON: {e}", path.display()))?;
    Ok(contracts::validate(kind, &document))
}
