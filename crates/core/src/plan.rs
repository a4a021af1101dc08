//! Sync planning: three-way classification of disk, local index and remote index
//!
//! Everything is decided against the index as it was at the start of the
//! run, so executing downloads never changes which files get uploaded.

use crate::local_index::LocalIndex;
use crate::metadata::Index;
use crate::snapshot::Snapshot;

/// Work for one sync pass, each list sorted by filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Remote has a state this client has never synced
    pub downloads: Vec<String>,
    /// On disk, unknown to both the local and remote index
    pub new_files: Vec<String>,
    /// Content changed since the last sync and the client is up to date
    pub edited_files: Vec<String>,
    /// Synced earlier, gone from disk, and the client is up to date
    pub deleted_files: Vec<String>,
}

impl SyncPlan {
    /// Check if there is nothing to do
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
            && self.new_files.is_empty()
            && self.edited_files.is_empty()
            && self.deleted_files.is_empty()
    }

    /// Number of files with an upload scheduled
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.new_files.len() + self.edited_files.len() + self.deleted_files.len()
    }
}

/// Classify every known file into downloads and uploads.
#[must_use]
pub fn plan_sync(snapshot: &Snapshot, local: &LocalIndex, remote: &Index) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (name, remote_meta) in remote {
        match local.version(name) {
            None => plan.downloads.push(name.clone()),
            Some(v) if remote_meta.version > v => plan.downloads.push(name.clone()),
            Some(_) => {}
        }
    }

    for (name, entry) in &snapshot.files {
        let Some(synced) = local.get(name) else {
            if !remote.contains_key(name) {
                plan.new_files.push(name.clone());
            }
            continue;
        };

        // Behind the remote: the download above wins, never race it
        let up_to_date = remote.get(name).is_some_and(|r| r.version == synced.version);
        if up_to_date && entry.hashes != synced.chunk_hashes {
            plan.edited_files.push(name.clone());
        }
    }

    for (name, remote_meta) in remote {
        if remote_meta.is_tombstone() || snapshot.is_present(name) {
            continue;
        }
        if local
            .get(name)
            .is_some_and(|synced| !synced.is_tombstone() && synced.version == remote_meta.version)
        {
            plan.deleted_files.push(name.clone());
        }
    }

    plan.downloads.sort();
    plan.new_files.sort();
    plan.edited_files.sort();
    plan.deleted_files.sort();
    plan
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::SystemTime;

    use super::*;
    use crate::hash::ContentHash;
    use crate::metadata::FileMetadata;
    use crate::scan::FileEntry;

    fn entry(name: &str, content: &[u8]) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size: content.len() as u64,
            modified: SystemTime::now(),
            hashes: vec![ContentHash::from_bytes(content)],
        }
    }

    fn meta(name: &str, version: u64, content: &[u8]) -> FileMetadata {
        FileMetadata::new(name, version, vec![ContentHash::from_bytes(content)])
    }

    fn remote(records: Vec<FileMetadata>) -> Index {
        records.into_iter().map(|m| (m.filename.clone(), m)).collect()
    }

    fn local(records: &[FileMetadata]) -> LocalIndex {
        let mut index = LocalIndex::new();
        for m in records {
            index.insert(m);
        }
        index
    }

    #[test]
    fn test_fresh_client_downloads_everything() {
        let snapshot = Snapshot::empty();
        let remote = remote(vec![meta("b.txt", 2, b"b"), meta("a.txt", 1, b"a")]);

        let plan = plan_sync(&snapshot, &LocalIndex::new(), &remote);

        assert_eq!(plan.downloads, vec!["a.txt", "b.txt"]);
        assert_eq!(plan.upload_count(), 0);
    }

    #[test]
    fn test_newer_remote_version_is_downloaded() {
        let snapshot = Snapshot::from_entries(vec![entry("a.txt", b"old")]);
        let local = local(&[meta("a.txt", 1, b"old")]);
        let remote = remote(vec![meta("a.txt", 2, b"new")]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.downloads, vec!["a.txt"]);
        assert!(plan.edited_files.is_empty());
    }

    #[test]
    fn test_equal_versions_are_not_downloaded() {
        let snapshot = Snapshot::from_entries(vec![entry("a.txt", b"same")]);
        let local = local(&[meta("a.txt", 3, b"same")]);
        let remote = remote(vec![meta("a.txt", 3, b"same")]);

        assert!(plan_sync(&snapshot, &local, &remote).is_empty());
    }

    #[test]
    fn test_new_file_is_uploaded() {
        let snapshot = Snapshot::from_entries(vec![entry("new.txt", b"fresh")]);

        let plan = plan_sync(&snapshot, &LocalIndex::new(), &Index::new());
        assert_eq!(plan.new_files, vec!["new.txt"]);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn test_file_created_on_both_sides_is_downloaded() {
        let snapshot = Snapshot::from_entries(vec![entry("f.txt", b"mine")]);
        let remote = remote(vec![meta("f.txt", 1, b"theirs")]);

        let plan = plan_sync(&snapshot, &LocalIndex::new(), &remote);
        assert_eq!(plan.downloads, vec!["f.txt"]);
        assert!(plan.new_files.is_empty());
    }

    #[test]
    fn test_edit_on_current_version_is_uploaded() {
        let snapshot = Snapshot::from_entries(vec![entry("a.txt", b"edited")]);
        let local = local(&[meta("a.txt", 1, b"original")]);
        let remote = remote(vec![meta("a.txt", 1, b"original")]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.edited_files, vec!["a.txt"]);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn test_edit_on_stale_version_waits_for_download() {
        let snapshot = Snapshot::from_entries(vec![entry("a.txt", b"edited")]);
        let local = local(&[meta("a.txt", 1, b"original")]);
        let remote = remote(vec![meta("a.txt", 2, b"winner")]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.downloads, vec!["a.txt"]);
        assert!(plan.edited_files.is_empty());
    }

    #[test]
    fn test_local_delete_becomes_tombstone_upload() {
        let snapshot = Snapshot::empty();
        let local = local(&[meta("gone.txt", 4, b"x")]);
        let remote = remote(vec![meta("gone.txt", 4, b"x")]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.deleted_files, vec!["gone.txt"]);
    }

    #[test]
    fn test_unreadable_file_is_not_a_delete() {
        let snapshot = Snapshot::new(vec![], BTreeSet::from(["locked.txt".to_string()]));
        let local = local(&[meta("locked.txt", 1, b"x")]);
        let remote = remote(vec![meta("locked.txt", 1, b"x")]);

        assert!(plan_sync(&snapshot, &local, &remote).is_empty());
    }

    #[test]
    fn test_files_under_unreadable_directory_are_not_deletes() {
        let snapshot = Snapshot::new(vec![], BTreeSet::from(["sub".to_string()]));
        let local = local(&[meta("sub/f.txt", 1, b"x"), meta("subway.txt", 1, b"y")]);
        let remote = remote(vec![meta("sub/f.txt", 1, b"x"), meta("subway.txt", 1, b"y")]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.deleted_files, vec!["subway.txt"]);
    }

    #[test]
    fn test_tombstones_are_not_deleted_twice() {
        let snapshot = Snapshot::empty();
        let local = local(&[FileMetadata::tombstone("gone.txt", 2)]);
        let remote = remote(vec![FileMetadata::tombstone("gone.txt", 2)]);

        assert!(plan_sync(&snapshot, &local, &remote).is_empty());
    }

    #[test]
    fn test_recreated_file_after_tombstone_is_an_edit() {
        let snapshot = Snapshot::from_entries(vec![entry("back.txt", b"again")]);
        let local = local(&[FileMetadata::tombstone("back.txt", 2)]);
        let remote = remote(vec![FileMetadata::tombstone("back.txt", 2)]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.edited_files, vec!["back.txt"]);
    }

    #[test]
    fn test_remote_tombstone_is_downloaded() {
        let snapshot = Snapshot::from_entries(vec![entry("a.txt", b"x")]);
        let local = local(&[meta("a.txt", 1, b"x")]);
        let remote = remote(vec![FileMetadata::tombstone("a.txt", 2)]);

        let plan = plan_sync(&snapshot, &local, &remote);
        assert_eq!(plan.downloads, vec!["a.txt"]);
        assert_eq!(plan.upload_count(), 0);
    }
}
