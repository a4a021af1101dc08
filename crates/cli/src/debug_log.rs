//! Per-run log files
//!
//! Every invocation writes a full trace to
//! `<dir>/surfstore-<command>-<uuid>.log`, where `<dir>` is
//! `$SURFSTORE_LOG_DIR` or the system temp directory. The console only
//! shows info (or debug with `--verbose`).

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _};

/// Overrides where log files are written
const LOG_DIR_ENV: &str = "SURFSTORE_LOG_DIR";

/// Crates traced at full detail in the log file
const TRACED_CRATES: &[&str] = &[
    "surfstore",
    "surfstore_core",
    "surfstore_transport",
    "surfstore_sync",
];

/// An open log file; dropping it flushes and closes the writer
pub struct LogSession {
    pub path: PathBuf,
    _guard: WorkerGuard,
}

fn log_dir(configured: Option<PathBuf>) -> PathBuf {
    configured
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(std::env::temp_dir)
}

fn log_file_name(command: &str, session: uuid::Uuid) -> String {
    format!("surfstore-{command}-{session}.log")
}

/// `warn` for dependencies, `trace` for our own crates
fn file_directives() -> String {
    std::iter::once("warn".to_string())
        .chain(TRACED_CRATES.iter().map(|name| format!("{name}=trace")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the file and console layers for this run.
///
/// `RUST_LOG` replaces the file filter; the console level only follows
/// `verbose`. Keep the returned session alive until exit.
pub fn init(verbose: bool, command: &str) -> LogSession {
    let dir = log_dir(std::env::var_os(LOG_DIR_ENV).map(PathBuf::from));
    let name = log_file_name(command, uuid::Uuid::new_v4());
    let path = dir.join(&name);

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        Path::new(&dir),
        &name,
    ));
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(file_directives()));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_filter(file_filter);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    LogSession {
        path,
        _guard: guard,
    }
}
