//! MCP proxy entry point: parse flags, load the fleet configuration, and run
//! the selected frontend.

use anyhow::Context as _;
use clap::Parser;
use mcp_proxy::config::{CliArgs, Config, Mode};
use mcp_proxy::fleet::Fleet;
use mcp_proxy::{command, http};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    init_logging(cli.log_level.as_deref());

    let config_path = cli.config.as_deref().context(
        "MCP_PROXY_CONFIG environment variable or --config flag must be set",
    )?;
    let config = Config::load(config_path)?;

    tracing::info!(
        "Loaded {} MCP server(s) from {}",
        config.mcp_servers.len(),
        config_path.display()
    );

    let fleet = Arc::new(Fleet::new(config).await?);

    match cli.mode {
        Mode::Http => {
            let addr: SocketAddr = cli
                .bind
                .parse()
                .with_context(|| format!("invalid bind address '{}'", cli.bind))?;
            http::serve(fleet, addr).await
        }
        Mode::Command => command::run(fleet).await,
    }
}

/// Logging goes to stderr in both modes; in command mode stdout is the
/// client transport.
fn init_logging(log_level: Option<&str>) {
    let filter = log_level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
