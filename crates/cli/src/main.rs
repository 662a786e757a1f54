//! buildloop CLI: the main entry point.
//!
//! Commands:
//! - `plan`      Turn a request into a stored build plan
//! - `build`     Build every file of a stored plan
//! - `audit`     Audit a stored plan or generated file
//! - `validate`  Check a JSON document against its schema, offline
//! - `config`    Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "buildloop",
    about = "buildloop: plan, build and audit software with agent loops",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.buildloop/config.toml)
    #[arg(long, global = true, env = "BUILDLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of governance contracts (defaults to ~/.buildloop/contracts)
    #[arg(long, global = true)]
    contracts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a build from a natural-language request
    Plan {
        /// What to build
        request: String,

        /// Build id to store the plan under (generated when omitted)
        #[arg(long)]
        build_id: Option<String>,

        /// Build the plan right away
        #[arg(long)]
        build: bool,
    },

    /// Build every file of a stored plan
    Build { build_id: String },

    /// Audit a stored plan, or one generated file of a finished build
    Audit {
        build_id: String,

        /// Audit this generated file instead of the plan
        #[arg(long)]
        file: Option<String>,
    },

    /// Validate a JSON document against its schema
    Validate {
        path: PathBuf,

        #[arg(long, value_enum, default_value_t = DocumentKind::Plan)]
        kind: DocumentKind,
    },

    /// Show the effective configuration (API key redacted)
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DocumentKind {
    Plan,
    Verdict,
    File,
}

impl From<DocumentKind> for buildloop_core::ArtifactKind {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Plan => Self::Plan,
            DocumentKind::Verdict => Self::AuditVerdict,
            DocumentKind::File => Self::GeneratedFile,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    let contracts_dir = cli.contracts.as_deref();
    match cli.command {
        Commands::Plan { request, build_id, build } => {
            let runtime = commands::Runtime::load(config_path, contracts_dir)?;
            let build_id = commands::plan::run(&runtime, &request, build_id).await?;
            if build {
                commands::build::run(&runtime, &build_id).await?;
            }
        }
        Commands::Build { build_id } => {
            let runtime = commands::Runtime::load(config_path, contracts_dir)?;
            commands::build::run(&runtime, &build_id).await?;
        }
        Commands::Audit { build_id, file } => {
            let runtime = commands::Runtime::load(config_path, contracts_dir)?;
            commands::audit::run(&runtime, &build_id, file.as_deref()).await?;
        }
        Commands::Validate { path, kind } => commands::validate::run(&path, kind.into())?,
        Commands::Config { path } => commands::config_cmd::run(config_path, path)?,
    }

    Ok(())
}
