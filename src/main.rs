use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use llm_proxy::config;
use llm_proxy::proxy::{init_tracing, ProxyServer};

#[derive(Parser, Debug)]
#[command(name = "llm-proxy", version, about = "Model-aliasing proxy for LLM APIs")]
struct Cli {
    /// Config file to use instead of the search path.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(settings.log_level);

    tracing::info!(
        upstream = %settings.upstream_url,
        port = settings.port,
        log_level = %settings.log_level,
        mappings = settings.model_mappings.len(),
        "Configuration loaded"
    );
    for (alias, upstream) in &settings.model_mappings {
        tracing::debug!(alias = %alias, upstream = %upstream, "Model mapping");
    }

    let server = ProxyServer::new(&settings).context("failed to build proxy server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = shutdown.listen_for_signals().await {
            tracing::error!(error = %e, "Failed to install signal handlers");
        }
    });

    server.run().await.context("proxy server failed")?;
    Ok(())
}
