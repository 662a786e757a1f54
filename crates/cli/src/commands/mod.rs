//! CLI subcommands and the runtime they share.

pub mod audit;
pub mod build;
pub mod config_cmd;
pub mod plan;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use buildloop_agent::{BuildPipeline, StaticContracts, TurnObserver, TurnReport};
use buildloop_config::{AppConfig, StoreBackend};
use buildloop_core::{ArtifactStore, CancellationToken, UsageTotals};
use buildloop_providers::AnthropicProvider;
use buildloop_store::{FileStore, InMemoryStore};
use tracing::{info, warn};

/// Everything a pipeline command needs, wired from config.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn ArtifactStore>,
    pub pipeline: BuildPipeline,
}

impl Runtime {
    pub fn load(
        config_path: Option<&Path>,
        contracts_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(config_path)?;

        // Check for API key early and give a clear error
        if !config.has_api_key() {
            eprintln!();
            eprintln!("  ERROR: No API key configured!");
            eprintln!();
            eprintln!("  Set one of these environment variables:");
            eprintln!("    export ANTHROPIC_API_KEY='sk-ant-...'");
            eprintln!("    export BUILDLOOP_API_KEY='sk-ant-...'");
            eprintln!();
            eprintln!("  Or add it to your config file:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            return Err("No API key found. See above for setup instructions.".into());
        }

        let provider = Arc::new(AnthropicProvider::from_config(&config)?);

        let store: Arc<dyn ArtifactStore> = match config.store.backend {
            StoreBackend::File => Arc::new(FileStore::new(config.store.dir())),
            StoreBackend::Memory => {
                warn!("Memory store selected: plans and reports are lost on exit");
                Arc::new(InMemoryStore::new())
            }
        };

        let contracts_dir = contracts_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| AppConfig::config_dir().join("contracts"));
        let contracts = if contracts_dir.is_dir() {
            let loaded = StaticContracts::from_dir(&contracts_dir)
                .map_err(|e| format!("Failed to read contracts from {}: {e}", contracts_dir.display()))?;
            info!(dir = %contracts_dir.display(), "Contracts loaded");
            loaded
        } else {
            StaticContracts::new()
        };

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  ⏹  Interrupt received, stopping after the current turn...");
                on_interrupt.cancel();
            }
        });

        let pipeline = BuildPipeline::new(provider, store.clone(), Arc::new(contracts), &config)
            .with_observer(Arc::new(LogObserver))
            .with_cancellation(cancel);

        Ok(Self { config, store, pipeline })
    }
}

/// Load config from `path` when given, otherwise from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .map_err(|e| format!("Failed to load config: {e}"))?;
            config.apply_env(|name| std::env::var(name).ok());
            config
        }
        None => AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?,
    };
    Ok(config)
}

/// Logs one line per loop turn.
struct LogObserver;

impl TurnObserver for LogObserver {
    fn on_turn(&self, report: &TurnReport) {
        let actions: Vec<&str> = report.actions.iter().map(|a| a.name.as_str()).collect();
        info!(
            role = %report.role,
            turn = report.iteration,
            stop = ?report.stop_reason,
            output_tokens = report.output_tokens,
            cache_hit = report.cache_hit,
            actions = ?actions,
            "Turn finished"
        );
    }
}

pub(crate) fn print_usage(usage: &UsageTotals) {
    println!(
        "  Tokens:    {} in / {} out (cache: {} read, {} written)",
        usage.input_tokens, usage.output_tokens, usage.cache_read_tokens, usage.cache_write_tokens
    );
}
