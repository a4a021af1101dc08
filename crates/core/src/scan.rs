//! File scanning with gitignore support via the `ignore` crate

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use color_eyre::Result;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunker::{DEFAULT_BLOCK_SIZE, chunk_file};
use crate::config::CONFIG_FILE;
use crate::hash::ContentHash;
use crate::local_index::INDEX_DIR;
use crate::snapshot::Snapshot;

/// Metadata for a single file entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path from scan root, `/`-separated
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time
    pub modified: SystemTime,
    /// Ordered chunk hashes at the scanner's block size
    pub hashes: Vec<ContentHash>,
}

/// Scanner for directory trees with gitignore support
pub struct Scanner {
    root: PathBuf,
    block_size: usize,
    /// Additional ignore patterns beyond .gitignore
    extra_ignores: Vec<String>,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            extra_ignores: Vec::new(),
        }
    }

    /// Chunk size used to fingerprint files
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Add an extra ignore pattern
    #[must_use]
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.extra_ignores.push(pattern.into());
        self
    }

    /// Create a configured walk builder
    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false) // Include hidden files (e.g., .env.example)
            .git_ignore(true) // Respect .gitignore
            .git_global(false) // Shared roots must not depend on one user's global config
            .git_exclude(true) // Respect .git/info/exclude
            .require_git(false) // Work even without .git directory
            .filter_entry(|e| !is_control_name(e.file_name()));

        let mut overrides = ignore::overrides::OverrideBuilder::new(&self.root);
        for pattern in &self.extra_ignores {
            // Override globs whitelist by default; `!` turns them into ignores
            if let Err(e) = overrides.add(&format!("!{pattern}")) {
                warn!("ignoring invalid pattern {pattern:?}: {e}");
            }
        }
        match overrides.build() {
            Ok(overrides) => {
                builder.overrides(overrides);
            }
            Err(e) => warn!("failed to build ignore patterns: {e}"),
        }

        builder
    }

    /// Scan the directory and fingerprint every file.
    ///
    /// Files that cannot be read are logged and listed in
    /// [`Snapshot::skipped`] instead of failing the scan.
    ///
    /// # Errors
    /// Returns an error if the root itself cannot be read
    pub fn scan(&self) -> Result<Snapshot> {
        std::fs::read_dir(&self.root)?;

        let mut entries = Vec::new();
        let mut skipped = BTreeSet::new();

        for result in self.walk_builder().build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    // Whatever lies under an unreadable path is unknown, not gone
                    let prefix = error_path(&e)
                        .and_then(|path| relative_name(&self.root, path))
                        .unwrap_or_default();
                    warn!("walk error, treating {prefix:?} as unreadable: {e}");
                    skipped.insert(prefix);
                    continue;
                }
            };
            let path = entry.path();

            // Skip directories, only process files
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Some(name) = relative_name(&self.root, path) else {
                warn!("skipping non UTF-8 path {}", path.display());
                continue;
            };

            match self.fingerprint(path, name.clone()) {
                Ok(file) => entries.push(file),
                Err(e) => {
                    warn!("skipping unreadable file {name}: {e}");
                    skipped.insert(name);
                }
            }
        }

        debug!("scanned {} files under {}", entries.len(), self.root.display());
        Ok(Snapshot::new(entries, skipped))
    }

    fn fingerprint(&self, path: &Path, name: String) -> Result<FileEntry> {
        let metadata = std::fs::metadata(path)?;
        let hashes = chunk_file(path, self.block_size)?;
        Ok(FileEntry {
            name,
            size: metadata.len(),
            modified: metadata.modified()?,
            hashes,
        })
    }
}

/// `/`-joined path of `path` relative to `root`
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// Client-owned entries that are never synced
fn is_control_name(name: &OsStr) -> bool {
    name == ".git" || name == INDEX_DIR || name == CONFIG_FILE
}

/// Path an `ignore` walk error refers to, if it names one
fn error_path(error: &ignore::Error) -> Option<&Path> {
    match error {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Partial(errors) => errors.iter().find_map(error_path),
        _ => None,
    }
}

/// Whether a filename received from the server may be written locally.
///
/// It must stay inside the sync root and must not touch an entry the
/// scanner never syncs (`.git`, the index directory, the config file).
#[must_use]
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name).components().all(|c| match c {
            Component::Normal(part) => !is_control_name(part),
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get("file1.txt").unwrap().hashes,
            vec![ContentHash::from_bytes(b"hello")]
        );
        assert!(snapshot.get("file2.txt").is_some());
    }

    #[test]
    fn test_scan_uses_block_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), "ABCDEFG").unwrap();

        let snapshot = Scanner::new(dir.path()).block_size(4).scan().unwrap();
        let entry = snapshot.get("f.txt").unwrap();

        assert_eq!(entry.size, 7);
        assert_eq!(
            entry.hashes,
            vec![ContentHash::from_bytes(b"ABCD"), ContentHash::from_bytes(b"EFG")]
        );
    }

    #[test]
    fn test_scan_skips_index_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(INDEX_DIR)).unwrap();
        fs::write(dir.path().join(INDEX_DIR).join("index.rkyv"), "state").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("keep.txt").is_some());
    }

    #[test]
    fn test_scan_skips_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "block_size = 4\n").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(CONFIG_FILE).is_none());
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join("ignore.log"), "ignore").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();

        assert!(snapshot.get("keep.txt").is_some());
        assert!(snapshot.get(".gitignore").is_some());
        assert!(snapshot.get("ignore.log").is_none());
    }

    #[test]
    fn test_extra_ignore_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join("scratch.tmp"), "tmp").unwrap();

        let snapshot = Scanner::new(dir.path()).ignore("*.tmp").scan().unwrap();

        assert!(snapshot.get("keep.txt").is_some());
        assert!(snapshot.get("scratch.tmp").is_none());
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/dir")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/dir/deep.txt"), "deep").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();

        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get("sub/dir/deep.txt").is_some());
    }

    #[test]
    fn test_scan_records_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.txt");
        fs::write(&path, "old").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&path, mtime).unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();
        let modified = snapshot.get("old.txt").unwrap().modified;

        assert_eq!(filetime::FileTime::from_system_time(modified), mtime);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty"), "").unwrap();

        let snapshot = Scanner::new(dir.path()).scan().unwrap();
        assert!(snapshot.get("empty").unwrap().hashes.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Scanner::new(dir.path().join("nope")).scan().is_err());
    }

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("a.txt"));
        assert!(is_safe_name("dir/a.txt"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("../escape"));
        assert!(!is_safe_name("/etc/passwd"));
        assert!(!is_safe_name("dir/../../x"));

        assert!(!is_safe_name(".git/hooks/post-merge"));
        assert!(!is_safe_name("vendor/lib/.git/config"));
        assert!(!is_safe_name(".surfstore/index.rkyv"));
        assert!(!is_safe_name(".surfstore.toml"));
        assert!(!is_safe_name("sub/.surfstore.toml"));
        assert!(is_safe_name(".gitignore"));
        assert!(is_safe_name("notes/.surfstore.toml.bak"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped_not_missing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f.txt"), "hidden").unwrap();
        fs::write(dir.path().join("top.txt"), "top").unwrap();

        fs::set_permissions(&sub, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&sub).is_ok() {
            // Running with privileges that ignore permission bits
            fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let snapshot = Scanner::new(dir.path()).scan().unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(snapshot.get("top.txt").is_some());
        assert!(snapshot.get("sub/f.txt").is_none());
        assert!(snapshot.skipped.contains("sub"));
        assert!(snapshot.is_present("sub/f.txt"));
    }
}
