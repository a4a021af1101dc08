//! surfstore-server: hosts the metadata service, the block service, or both
//!
//! All services share one TCP listener speaking the framed protocol from
//! `surfstore_core::protocol`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::bail;
use tokio::net::TcpListener;
use tracing::info;

use surfstore_core::{BlockBackend, DiskBlockStore, MemoryBlockStore, MetaStore};
use surfstore_transport::{Services, serve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Service {
    /// Metadata service only
    Meta,
    /// Block service only
    Block,
    /// Both services on one listener
    Both,
}

#[derive(Parser)]
#[command(name = "surfstore-server")]
#[command(version)]
#[command(about = "Metadata and block service host for surfstore")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Which services to host
    #[arg(short, long, value_enum, default_value_t = Service::Both)]
    service: Service,

    /// Block service address advertised to clients (defaults to --addr when hosting both)
    #[arg(long)]
    block_addr: Option<String>,

    /// Persist blocks in an LMDB store at this directory instead of memory
    #[arg(long)]
    block_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Resolve which stores this process owns
fn build_services(cli: &Cli) -> Result<Services> {
    let blocks: Option<Arc<dyn BlockBackend>> = match cli.service {
        Service::Meta => None,
        Service::Block | Service::Both => Some(match &cli.block_dir {
            Some(dir) => {
                info!("Opening block store at {}", dir.display());
                Arc::new(DiskBlockStore::open(dir)?)
            }
            None => Arc::new(MemoryBlockStore::new()),
        }),
    };

    let meta = match cli.service {
        Service::Block => None,
        Service::Meta | Service::Both => {
            let block_addr = match (&cli.block_addr, cli.service) {
                (Some(addr), _) => addr.clone(),
                (None, Service::Both) => cli.addr.to_string(),
                (None, _) => bail!("--block-addr is required when hosting only the metadata service"),
            };
            info!("Advertising block store at {block_addr}");
            Some(Arc::new(MetaStore::new(block_addr)))
        }
    };

    Ok(Services { meta, blocks })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let services = build_services(&cli)?;
    if let Some(blocks) = &services.blocks {
        let stats = blocks.stats()?;
        info!(
            "Block store holds {} blocks ({} bytes)",
            stats.count, stats.total_bytes
        );
    }

    let listener = TcpListener::bind(cli.addr).await?;
    info!(
        "surfstore-server {} serving {:?} on {}",
        env!("CARGO_PKG_VERSION"),
        cli.service,
        listener.local_addr()?
    );

    tokio::select! {
        result = serve(listener, Arc::new(services)) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
