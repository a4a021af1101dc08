//! surfstore: keep a directory in sync with a shared versioned store
//!
//! - Fixed-size BLAKE3 chunking, only missing blocks are uploaded
//! - Per-file versions with compare-and-set commits
//! - Native .gitignore support
//! - File watching with debouncing

mod debug_log;
mod progress;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Args, Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tracing::{debug, error, info};

use surfstore_core::local_index::INDEX_DIR;
use surfstore_core::{Scanner, SyncConfig};
use surfstore_sync::Reconciler;
use surfstore_transport::TcpTransport;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "surfstore")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a directory against a shared versioned block store")]
#[command(long_about = r#"
surfstore keeps a directory in sync with a metadata service and a
content-addressed block service.

Settings come from <dir>/.surfstore.toml and can be overridden by flags.

Examples:
  surfstore sync ./notes --meta-addr 10.0.0.5:8080    One-time sync
  surfstore watch ./notes                             Continuous sync
  surfstore scan ./notes --format json                Show what would be tracked
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for `.surfstore.toml`
#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// Metadata service address (host:port)
    #[arg(short, long)]
    meta_addr: Option<String>,

    /// Chunk size in bytes; must match every other client
    #[arg(short, long)]
    block_size: Option<usize>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass
    Sync {
        /// Directory to sync
        dir: PathBuf,

        #[command(flatten)]
        args: SyncArgs,
    },

    /// Sync, then keep syncing on local changes and on a timer
    Watch {
        /// Directory to sync
        dir: PathBuf,

        #[command(flatten)]
        args: SyncArgs,

        /// Debounce delay in milliseconds
        #[arg(short, long, default_value = "100")]
        debounce: u64,

        /// Seconds between syncs that pull remote changes
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },

    /// Scan a directory and print its chunk fingerprints
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,

        /// Chunk size in bytes
        #[arg(short, long)]
        block_size: Option<usize>,
    },

    /// Show version and build info
    Version,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Watch { .. } => "watch",
            Self::Scan { .. } => "scan",
            Self::Version => "version",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let session = debug_log::init(cli.verbose, cli.command.name());
    debug!("Debug log at {}", session.path.display());

    let result = match cli.command {
        Commands::Version => {
            eprintln!("surfstore {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
        Commands::Scan {
            path,
            format,
            block_size,
        } => scan_command(&path, &format, block_size),
        Commands::Sync { dir, args } => sync_command(&dir, &args).await,
        Commands::Watch {
            dir,
            args,
            debounce,
            interval,
        } => watch_command(&dir, &args, debounce, interval).await,
    };

    if result.is_err() {
        eprintln!("Debug log: {}", session.path.display());
    }
    result
}

/// Merge the config file with command-line overrides
fn load_config(dir: &Path, args: &SyncArgs) -> Result<SyncConfig> {
    let mut config = SyncConfig::load(dir)?;
    if let Some(addr) = &args.meta_addr {
        config.meta_addr = Some(addr.clone());
    }
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

fn build_reconciler(dir: &Path, config: &SyncConfig) -> Result<Reconciler> {
    let meta_addr = config.meta_addr.clone().ok_or_else(|| {
        eyre!("no metadata service address: pass --meta-addr or set meta_addr in .surfstore.toml")
    })?;
    let transport = TcpTransport::new(meta_addr, config.timeout());
    Ok(Reconciler::from_config(dir, config, Arc::new(transport)))
}

fn scan_command(path: &Path, format: &str, block_size: Option<usize>) -> Result<()> {
    info!("Scanning {}...", path.display());

    let mut config = SyncConfig::load(path)?;
    if let Some(block_size) = block_size {
        config.block_size = block_size;
    }
    config.validate()?;

    let scanner = config
        .ignore
        .iter()
        .fold(Scanner::new(path).block_size(config.block_size), |s, p| {
            s.ignore(p.clone())
        });
    let snapshot = scanner.scan()?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{json}");
        }
        _ => {
            progress::scanned(&snapshot);

            if snapshot.len() <= 20 {
                let mut names: Vec<_> = snapshot.files.values().collect();
                names.sort_by(|a, b| a.name.cmp(&b.name));
                for entry in names {
                    eprintln!(
                        "  {} ({} bytes, {} blocks)",
                        entry.name,
                        entry.size,
                        entry.hashes.len()
                    );
                }
            }
            for name in &snapshot.skipped {
                eprintln!("  {name} (unreadable)");
            }
        }
    }

    Ok(())
}

async fn sync_command(dir: &Path, args: &SyncArgs) -> Result<()> {
    let config = load_config(dir, args)?;
    let reconciler = build_reconciler(dir, &config)?;
    run_once(&reconciler).await
}

async fn run_once(reconciler: &Reconciler) -> Result<()> {
    info!("Syncing {}...", reconciler.root().display());
    let progress = progress::SyncProgress::new();
    let report = reconciler.run().await?;
    progress.finish(&report);
    Ok(())
}

/// Whether a watcher event should trigger a sync
fn is_relevant(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    !relative
        .components()
        .any(|c| matches!(c, Component::Normal(part) if part == INDEX_DIR))
}

async fn watch_command(dir: &Path, args: &SyncArgs, debounce_ms: u64, interval: u64) -> Result<()> {
    let config = load_config(dir, args)?;
    let reconciler = build_reconciler(dir, &config)?;
    let root = std::fs::canonicalize(dir)?;

    info!("Watching {}", root.display());

    // Initial sync
    if let Err(e) = run_once(&reconciler).await {
        error!("Sync failed: {e:#}");
    }

    // Setup file watcher
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| {
            if let Ok(events) = result {
                let _ = tx.send(events);
            }
        },
    )?;

    debouncer.watch(&root, RecursiveMode::Recursive)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    // The first tick fires immediately and the initial sync already ran
    ticker.tick().await;

    info!("Watching for changes (Ctrl+C to stop)...");

    loop {
        tokio::select! {
            events = rx.recv() => {
                let Some(events) = events else {
                    error!("Watcher stopped");
                    break;
                };
                let paths: Vec<_> = events
                    .iter()
                    .flat_map(|e| e.paths.iter())
                    .filter(|p| is_relevant(&root, p))
                    .collect();

                if paths.is_empty() {
                    continue;
                }

                info!("Detected {} changed paths, syncing...", paths.len());
                for path in &paths {
                    debug!("  Changed: {}", path.display());
                }
            }
            _ = ticker.tick() => {
                debug!("Polling for remote changes");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
        }

        if let Err(e) = run_once(&reconciler).await {
            error!("Sync failed: {e:#}");
        }
    }

    Ok(())
}
