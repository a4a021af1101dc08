//! Reconciler: one sync pass between a directory and the remote services
//!
//! A pass scans the directory, fetches the remote index, plans against the
//! local index as loaded at the start, applies downloads and then uploads.
//! Per-file failures are recorded in the [`SyncReport`] and never stop the
//! pass; the only fatal errors are an unreadable local index and an
//! unreachable metadata service.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail, eyre};
use tracing::{debug, info, warn};

use surfstore_core::scan::is_safe_name;
use surfstore_core::{
    ContentHash, DEFAULT_BLOCK_SIZE, FileMetadata, Index, LocalIndex, Scanner, Snapshot,
    SyncConfig, UpdateOutcome, plan_sync, split_blocks,
};
use surfstore_transport::{BlockService, MetadataService, Transport};

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files written from the remote
    pub downloaded: Vec<String>,
    /// Local files removed because the remote holds a tombstone
    pub removed: Vec<String>,
    /// Content commits accepted by the metadata service
    pub uploaded: Vec<String>,
    /// Tombstone commits accepted by the metadata service
    pub deleted: Vec<String>,
    /// Uploads rejected because another client committed first
    pub conflicts: Vec<String>,
    /// Files that failed this pass, with the reason
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Number of files changed on either side
    #[must_use]
    pub fn changed(&self) -> usize {
        self.downloaded.len() + self.removed.len() + self.uploaded.len() + self.deleted.len()
    }

    /// Whether every planned file succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How an upload is derived from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    New,
    Edited,
    Deleted,
}

/// Sync engine for one directory
pub struct Reconciler {
    root: PathBuf,
    block_size: usize,
    ignores: Vec<String>,
    transport: Arc<dyn Transport>,
}

impl Reconciler {
    pub fn new(root: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            root: root.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            ignores: Vec::new(),
            transport,
        }
    }

    /// Engine configured from a loaded config file
    pub fn from_config(
        root: impl Into<PathBuf>,
        config: &SyncConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            block_size: config.block_size,
            ignores: config.ignore.clone(),
            ..Self::new(root, transport)
        }
    }

    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.ignores.push(pattern.into());
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the directory off the async runtime
    async fn scan(&self) -> Result<Snapshot> {
        let scanner = self
            .ignores
            .iter()
            .fold(Scanner::new(&self.root).block_size(self.block_size), |s, p| {
                s.ignore(p.clone())
            });
        tokio::task::spawn_blocking(move || scanner.scan()).await?
    }

    /// Run one sync pass.
    ///
    /// # Errors
    /// Returns an error if the local index is corrupt, the directory cannot
    /// be scanned, or the metadata service cannot be reached. Nothing is
    /// changed on either side in those cases.
    pub async fn run(&self) -> Result<SyncReport> {
        if self.block_size == 0 {
            bail!("block size must be greater than zero");
        }

        let local = LocalIndex::load(&self.root)?;
        let snapshot = self.scan().await?;
        debug!("scanned {} files, {} unreadable", snapshot.len(), snapshot.skipped.len());

        let meta = self.transport.metadata();
        let remote = meta
            .get_file_info_map()
            .await
            .wrap_err("failed to fetch remote index")?;
        let block_addr = meta
            .get_block_store_addr()
            .await
            .wrap_err("failed to resolve block store address")?;
        let blocks = self.transport.block_service(&block_addr);

        let plan = plan_sync(&snapshot, &local, &remote);
        info!(
            "{} to download, {} new, {} edited, {} deleted",
            plan.downloads.len(),
            plan.new_files.len(),
            plan.edited_files.len(),
            plan.deleted_files.len()
        );

        let mut pass = Pass {
            root: &self.root,
            block_size: self.block_size,
            meta,
            blocks,
            remote: &remote,
            local,
            report: SyncReport::default(),
        };

        for name in &plan.downloads {
            let record = &remote[name];
            if let Err(e) = pass.download(record).await {
                pass.fail(name, &e);
            }
        }

        let uploads = plan
            .new_files
            .iter()
            .map(|n| (n, UploadKind::New))
            .chain(plan.edited_files.iter().map(|n| (n, UploadKind::Edited)))
            .chain(plan.deleted_files.iter().map(|n| (n, UploadKind::Deleted)));
        for (name, kind) in uploads {
            if let Err(e) = pass.upload(name, kind).await {
                pass.fail(name, &e);
            }
        }

        let report = pass.report;
        info!(
            "sync done: {} changed, {} conflicts, {} failed",
            report.changed(),
            report.conflicts.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// State for a single pass
struct Pass<'a> {
    root: &'a Path,
    block_size: usize,
    meta: Arc<dyn MetadataService>,
    blocks: Arc<dyn BlockService>,
    /// Remote index fetched at the start of the pass
    remote: &'a Index,
    local: LocalIndex,
    report: SyncReport,
}

impl Pass<'_> {
    fn fail(&mut self, name: &str, error: &color_eyre::Report) {
        warn!("{name}: {error:#}");
        self.report.failed.push((name.to_string(), format!("{error:#}")));
    }

    /// Record a confirmed state and persist the index
    fn confirm(&mut self, record: &FileMetadata) {
        self.local.insert(record);
        if let Err(e) = self.local.save(self.root) {
            // The entry is retried next pass; the file itself is already consistent
            warn!("failed to save local index after {}: {e:#}", record.filename);
        }
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_name(name) {
            bail!("refusing unsafe remote filename {name:?}");
        }
        Ok(self.root.join(name))
    }

    /// Bring one file to the remote state in `record`
    async fn download(&mut self, record: &FileMetadata) -> Result<()> {
        let name = record.filename.as_str();
        let path = self.path_of(name)?;

        if record.is_tombstone() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Removed {name} (deleted remotely, v{})", record.version),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).wrap_err_with(|| format!("failed to remove {name}")),
            }
            self.confirm(record);
            self.report.removed.push(name.to_string());
            return Ok(());
        }

        // Every block is fetched before anything touches the disk
        let mut content = Vec::new();
        for hash in &record.chunk_hashes {
            let block = self
                .blocks
                .get_block(*hash)
                .await
                .wrap_err_with(|| format!("failed to fetch block {hash}"))?;
            if block.hash != *hash || !block.verify() {
                bail!("block {hash} failed verification");
            }
            content.extend_from_slice(&block.data);
        }

        write_atomic(&path, &content).wrap_err_with(|| format!("failed to write {name}"))?;
        info!("Downloaded {name} v{} ({} blocks)", record.version, record.chunk_hashes.len());

        self.confirm(record);
        self.report.downloaded.push(name.to_string());
        Ok(())
    }

    async fn upload(&mut self, name: &str, kind: UploadKind) -> Result<()> {
        let path = self.path_of(name)?;
        let version = self.local.version(name).map_or(1, |v| v + 1);

        let record = if kind == UploadKind::Deleted {
            match path.symlink_metadata() {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Ok(_) => {
                    info!("{name} reappeared, not deleting");
                    return Ok(());
                }
                Err(e) => {
                    return Err(e).wrap_err_with(|| format!("cannot confirm {name} is gone"));
                }
            }
            FileMetadata::tombstone(name, version)
        } else {
            let data = Bytes::from(
                std::fs::read(&path).wrap_err_with(|| format!("failed to read {name}"))?,
            );
            let blocks = split_blocks(&data, self.block_size);
            let hashes = blocks.iter().map(|b| b.hash).collect::<Vec<_>>();

            let missing = self.missing_blocks(&hashes).await;
            let mut failed_puts = 0usize;
            let mut sent = HashSet::new();
            for block in blocks.into_iter().filter(|b| missing.contains(&b.hash)) {
                if !sent.insert(block.hash) {
                    continue;
                }
                match self.blocks.put_block(block.data).await {
                    Ok(true) => debug!("put block {} for {name}", block.hash),
                    Ok(false) => {
                        warn!("block service refused block {} for {name}", block.hash);
                        failed_puts += 1;
                    }
                    Err(e) => {
                        warn!("failed to put block {} for {name}: {e}", block.hash);
                        failed_puts += 1;
                    }
                }
            }
            if failed_puts > 0 {
                return Err(eyre!("{failed_puts} block uploads failed, commit skipped"));
            }

            FileMetadata::new(name, version, hashes)
        };

        match self.meta.update_file(record.clone()).await {
            Ok(UpdateOutcome::Accepted(accepted)) => {
                let record = FileMetadata::new(name, accepted, record.chunk_hashes);
                if record.is_tombstone() {
                    info!("Deleted {name} remotely (v{accepted})");
                    self.report.deleted.push(name.to_string());
                } else {
                    info!("Uploaded {name} v{accepted} ({kind:?})");
                    self.report.uploaded.push(name.to_string());
                }
                self.confirm(&record);
                Ok(())
            }
            Ok(UpdateOutcome::Stale) => {
                info!("{name} v{version} lost to a newer remote version, downloading");
                self.report.conflicts.push(name.to_string());
                self.recover(name).await
            }
            Err(e) => {
                let error = eyre!(e).wrap_err(format!("failed to commit {name}"));
                // Still try to catch up so the next pass starts from the winner
                if let Err(recovery) = self.recover(name).await {
                    warn!("{name}: recovery failed: {recovery:#}");
                }
                Err(error)
            }
        }
    }

    /// Hashes the block service does not have yet; all of them if it cannot say
    async fn missing_blocks(&self, hashes: &[ContentHash]) -> HashSet<ContentHash> {
        let all = hashes.iter().copied().collect::<HashSet<_>>();
        match self.blocks.has_blocks(all.iter().copied().collect()).await {
            Ok(present) => {
                let present = present.into_iter().collect::<HashSet<_>>();
                all.difference(&present).copied().collect()
            }
            Err(e) => {
                warn!("block existence check failed, uploading every block: {e}");
                all
            }
        }
    }

    /// Adopt the current remote state of `name` after a failed commit
    async fn recover(&mut self, name: &str) -> Result<()> {
        let current = match self.meta.get_file_info_map().await {
            Ok(mut index) => index.remove(name),
            Err(e) => {
                warn!("failed to refresh remote index: {e}");
                self.remote.get(name).cloned()
            }
        };

        match current {
            Some(record) if self.local.version(name).is_none_or(|v| record.version > v) => {
                self.download(&record).await
            }
            _ => Ok(()),
        }
    }
}

/// Replace `path` with `content` via a temp file in the same directory
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path().join("a/b")).unwrap().count(), 1);
    }

    #[test]
    fn test_report_counts() {
        let report = SyncReport {
            downloaded: vec!["a".into()],
            uploaded: vec!["b".into(), "c".into()],
            failed: vec![("d".into(), "boom".into())],
            ..SyncReport::default()
        };
        assert_eq!(report.changed(), 3);
        assert!(!report.is_clean());
    }
}
