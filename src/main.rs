use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use soma_ai::config::{Config, DEFAULT_LOG_FILTER, load_env_files};
use soma_ai::http::start_http_server;
use soma_ai::prompts::PromptRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "SomaAI symptom-checker backend", long_about = None)]
struct Args {
    /// TOML config file (defaults to $SOMA_CONFIG or soma.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides config and env
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Load and validate configuration, then exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Subscriber first so config loading warnings are not dropped; `.env`
    // is read beforehand so a `RUST_LOG` set there still applies.
    load_env_files();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let path = path.to_string_lossy();
            Config::load_with_env(&path)
        }
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    if config.runtime.openrouter_api_key.is_none() {
        warn!("OPENROUTER_API_KEY not set; the server will return sample responses");
    }

    if args.check_config {
        let prompts = PromptRegistry::new();
        for prompt in prompts.list() {
            info!(
                id = %prompt.id,
                version = %prompt.version,
                checksum = %prompt.lineage.checksum,
                "Prompt loaded"
            );
        }
        info!(
            bind = %config.server.bind,
            origin = config.allowed_origin(),
            model = %config.upstream.model,
            "Configuration OK"
        );
        return Ok(());
    }

    info!("Starting SomaAI backend v{}", env!("CARGO_PKG_VERSION"));
    start_http_server(config).await
}
