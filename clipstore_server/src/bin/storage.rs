//! Storage node binary
//!
//! Serves the per-node storage RPC over one base directory.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::Level;

use clipstore_core::config::StorageNodeConfig;
use clipstore_core::log::init_logging;
use clipstore_core::storage::StorageNode;

#[derive(Parser, Debug)]
#[command(name = "storage", about = "clipstore storage node")]
struct Args {
    /// Host address for the server
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port number for the server
    #[arg(long, default_value_t = 8090)]
    port: u16,

    /// TOML config file; when set, the other flags are ignored
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base directory for stored files
    base_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(Level::INFO);
    let args = Args::parse();

    let config = match args.config {
        Some(path) => StorageNodeConfig::from_file(path)?,
        None => StorageNodeConfig {
            host: args.host,
            port: args.port,
            base_dir: args.base_dir.ok_or("base directory argument is required")?,
        },
    };

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("storage node listening on {}", listener.local_addr()?);

    StorageNode::new(&config.base_dir).serve(listener).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_base_dir() {
        let args = Args::parse_from(["storage", "/var/lib/clipstore"]);
        assert_eq!(args.host, "localhost");
        assert_eq!(args.port, 8090);
        assert_eq!(args.base_dir, Some(PathBuf::from("/var/lib/clipstore")));
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from(["storage", "--host", "0.0.0.0", "--port", "9001", "data"]);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, 9001);
    }
}
