//! Configuration loading and validation for buildloop.
//!
//! Loads configuration from `~/.buildloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.buildloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Anthropic API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used by every role
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Per-role iteration ceilings
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    16_000
}
fn default_temperature() -> f32 {
    0.2
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("provider", &self.provider)
            .field("limits", &self.limits)
            .field("pipeline", &self.pipeline)
            .field("store", &self.store)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound on one model call. Generous, since extended reasoning
    /// can run for minutes.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com/v1".into()
}
fn default_request_timeout() -> u64 {
    600
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_planner_limit")]
    pub planner: usize,

    /// Shared by the builder and fixer roles
    #[serde(default = "default_builder_limit")]
    pub builder: usize,

    #[serde(default = "default_auditor_limit")]
    pub auditor: usize,

    /// Fail a loop after this many consecutive corrective turns.
    /// Unset means only the iteration ceiling applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_corrections: Option<usize>,
}

fn default_planner_limit() -> usize {
    25
}
fn default_builder_limit() -> usize {
    20
}
fn default_auditor_limit() -> usize {
    15
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            planner: default_planner_limit(),
            builder: default_builder_limit(),
            auditor: default_auditor_limit(),
            max_consecutive_corrections: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Cap on any string handed across a stage boundary
    #[serde(default = "default_handoff_max_chars")]
    pub handoff_max_chars: usize,

    #[serde(default = "default_lessons_cap")]
    pub lessons_cap: usize,

    #[serde(default = "default_notes_cap")]
    pub notes_cap: usize,

    /// Fix/re-audit rounds per file before it is left for review
    #[serde(default = "default_max_fix_rounds")]
    pub max_fix_rounds: u32,

    /// Files built concurrently within one tier
    #[serde(default = "default_max_parallel_files")]
    pub max_parallel_files: usize,
}

fn default_handoff_max_chars() -> usize {
    4000
}
fn default_lessons_cap() -> usize {
    20
}
fn default_notes_cap() -> usize {
    50
}
fn default_max_fix_rounds() -> u32 {
    2
}
fn default_max_parallel_files() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handoff_max_chars: default_handoff_max_chars(),
            lessons_cap: default_lessons_cap(),
            notes_cap: default_notes_cap(),
            max_fix_rounds: default_max_fix_rounds(),
            max_parallel_files: default_max_parallel_files(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root of the file store. Defaults to `~/.buildloop/store`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("store"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.buildloop/config.toml).
    ///
    /// Environment overrides:
    /// - `BUILDLOOP_API_KEY`, then `ANTHROPIC_API_KEY` (when no key is configured)
    /// - `BUILDLOOP_MODEL`
    /// - `BUILDLOOP_STORE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("BUILDLOOP_API_KEY").or_else(|| var("ANTHROPIC_API_KEY"));
        }
        if let Some(model) = var("BUILDLOOP_MODEL") {
            self.model = model;
        }
        if let Some(dir) = var("BUILDLOOP_STORE_DIR") {
            self.store.dir = Some(PathBuf::from(dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".buildloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.request_timeout_secs must be at least 1".into(),
            ));
        }

        for (name, value) in [
            ("limits.planner", self.limits.planner),
            ("limits.builder", self.limits.builder),
            ("limits.auditor", self.limits.auditor),
            ("pipeline.handoff_max_chars", self.pipeline.handoff_max_chars),
            ("pipeline.lessons_cap", self.pipeline.lessons_cap),
            ("pipeline.notes_cap", self.pipeline.notes_cap),
            ("pipeline.max_parallel_files", self.pipeline.max_parallel_files),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be at least 1")));
            }
        }
        if self.limits.max_consecutive_corrections == Some(0) {
            return Err(ConfigError::ValidationError(
                "limits.max_consecutive_corrections must be at least 1 when set".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The effective config as TOML, with the API key left out.
    pub fn redacted_toml(&self) -> String {
        let config = Self {
            api_key: None,
            ..self.clone()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            provider: ProviderConfig::default(),
            limits: LimitsConfig::default(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.planner, 25);
        assert_eq!(config.limits.builder, 20);
        assert_eq!(config.limits.auditor, 15);
        assert_eq!(config.provider.request_timeout(), Duration::from_secs(600));
        assert_eq!(config.store.backend, StoreBackend::File);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.pipeline.max_fix_rounds, config.pipeline.max_fix_rounds);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.limits.auditor = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limits.auditor"));

        let mut config = AppConfig::default();
        config.limits.max_consecutive_corrections = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model, default_model());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
model = "claude-opus-4"
temperature = 0.0

[limits]
builder = 8
max_consecutive_corrections = 3

[pipeline]
max_parallel_files = 2

[store]
backend = "memory"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "claude-opus-4");
        assert_eq!(config.limits.builder, 8);
        assert_eq!(config.limits.planner, 25);
        assert_eq!(config.limits.max_consecutive_corrections, Some(3));
        assert_eq!(config.pipeline.max_parallel_files, 2);
        assert_eq!(config.pipeline.handoff_max_chars, 4000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[store]\nbackend = \"postgres\"\n").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[provider]\nrequest_timeout_secs = 0\n").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("BUILDLOOP_MODEL", "claude-haiku"),
            ("BUILDLOOP_STORE_DIR", "/data/store"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.model, "claude-haiku");
        assert_eq!(config.store.dir(), PathBuf::from("/data/store"));
    }

    #[test]
    fn configured_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|name| (name == "BUILDLOOP_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn api_key_is_redacted() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
        assert!(!config.redacted_toml().contains("sk-secret"));
    }
}
