//! Server entry point: loads configuration, wires the [`Manager`], and
//! serves the HTTP/WebSocket API (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::sync::Arc;

use agentic_runtime::api::{HttpApiConfig, HttpApiServer};
use agentic_runtime::manager::Manager;
use agentic_runtime::{logging, RuntimeConfig};
use clap::Parser;

#[derive(Parser)]
#[command(name = "agentic-runtime")]
#[command(about = "Multi-agent retrieval-augmented orchestration server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind port from the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// OpenAI-compatible LLM endpoint. Defaults to `LLM_BASE_URL`.
    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// Model name passed to the LLM endpoint. Defaults to `LLM_MODEL`.
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// API key for the LLM endpoint. Defaults to `LLM_API_KEY`.
    #[arg(long, env = "LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// Run with a canned offline responder instead of a real LLM endpoint.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = RuntimeConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    logging::init(&config.log_level);

    let manager = if cli.offline || cli.llm_base_url.is_none() {
        tracing::warn!("no LLM_BASE_URL configured, running with an offline canned responder");
        Manager::new_with_mock(
            config.clone(),
            "This is a placeholder response; configure LLM_BASE_URL for real completions.",
        )
    } else {
        Manager::new_with_http_provider(
            config.clone(),
            cli.llm_base_url.unwrap(),
            cli.llm_model,
            cli.llm_api_key,
        )
    };

    let api_config = HttpApiConfig::from(&config);
    let server = HttpApiServer::new(api_config, Arc::clone(&manager));

    tracing::info!(bind = %config.bind_address, port = config.port, "starting server");
    server.start().await?;

    manager.shutdown().await;
    Ok(())
}
