//! `buildloop config`: show the effective configuration.

use std::path::{Path, PathBuf};

use buildloop_config::AppConfig;

use super::load_config;

pub fn run(config_path: Option<&Path>, path_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = resolved_path(config_path);
    if path_only {
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(config_path)?;
    println!("# {}", path.display());
    println!("{}", config.redacted_toml());
    if config.has_api_key() {
        println!("# api_key: [REDACTED]");
    } else {
        println!("# ⚠️  No API key set (set ANTHROPIC_API_KEY or BUILDLOOP_API_KEY)");
    }
    Ok(())
}

fn resolved_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
