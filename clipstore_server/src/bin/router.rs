//! Content router binary
//!
//! Dials the initial storage fleet and serves the admin RPC. Content
//! traffic goes through `NetworkContentService` embedded in the consuming
//! process; this binary is the standalone admin endpoint.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::Level;

use clipstore_core::config::RouterConfig;
use clipstore_core::content::NetworkContentService;
use clipstore_core::log::init_logging;

#[derive(Parser, Debug)]
#[command(name = "router", about = "clipstore content router and admin service")]
struct Args {
    /// Admin RPC host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Admin RPC port
    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// TOML config file; when set, the other flags are ignored
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated storage node addresses (node1:port1,node2:port2,...)
    nodes: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(Level::INFO);
    let args = Args::parse();

    let config = match args.config {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig {
            admin_host: args.host,
            admin_port: args.port,
            nodes: args
                .nodes
                .ok_or("node address list is required")?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        },
    };
    if config.nodes.is_empty() {
        return Err("at least one storage node address is required".into());
    }

    let service = NetworkContentService::new(&config.nodes).await?;

    let listener = TcpListener::bind((config.admin_host.as_str(), config.admin_port)).await?;
    service.serve_admin(listener).await?;
    Ok(())
}
