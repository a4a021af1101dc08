//! Cargo-style status output for surfstore
//!
//! ```text
//!    Scanned 12 files (48.20 KiB)
//!    Conflict draft.md (newer remote versions kept)
//!      Synced 3 files in 41ms
//! ```

use std::io::Write as _;
use std::time::Instant;

use surfstore_core::Snapshot;
use surfstore_sync::SyncReport;

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const CONFLICT: &str = "Conflict";
    const SCANNED: &str = "Scanned";
    const SYNCED: &str = "Synced";
    const UP_TO_DATE: &str = "Fresh";
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    print_styled(&console::Style::new().green().bold(), status, message);
}

fn print_styled(style: &console::Style, status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

/// Timer for one sync pass
pub struct SyncProgress {
    start: Instant,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> String {
        let elapsed = self.start.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }

    /// Show failures and the final summary; per-file changes are logged as they happen
    pub fn finish(&self, report: &SyncReport) {
        let yellow = console::Style::new().yellow().bold();
        if !report.conflicts.is_empty() {
            print_styled(
                &yellow,
                Status::CONFLICT,
                &format!("{} (newer remote versions kept)", report.conflicts.join(", ")),
            );
        }

        let elapsed = self.elapsed();
        if !report.is_clean() {
            let red = console::Style::new().red().bold();
            for (name, reason) in &report.failed {
                print_styled(&red, "Failed", &format!("{name}: {reason}"));
            }
            print_styled(
                &yellow,
                "Finished",
                &format!(
                    "{} changed, {} failed in {elapsed}",
                    report.changed(),
                    report.failed.len()
                ),
            );
        } else if report.changed() == 0 {
            print_status(Status::UP_TO_DATE, &format!("already in sync ({elapsed})"));
        } else {
            print_status(
                Status::SYNCED,
                &format!("{} files in {elapsed}", report.changed()),
            );
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line scan summary
pub fn scanned(snapshot: &Snapshot) {
    let size = humansize::format_size(snapshot.total_size(), humansize::BINARY);
    let mut message = format!("{} files ({size})", snapshot.len());
    if !snapshot.skipped.is_empty() {
        message.push_str(&format!(", {} unreadable", snapshot.skipped.len()));
    }
    print_status(Status::SCANNED, &message);
}
