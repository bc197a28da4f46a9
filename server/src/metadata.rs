use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use kernel::Stats;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::FileRecord;
use crate::error::{Error, Result};
use crate::paths;

#[derive(Deserialize)]
struct Snapshot {
    files: Vec<FileRecord>,
}

/// Durable index of stored files.
///
/// The whole record set is rewritten on every mutation through a temporary
/// file renamed over the artifact, so readers never observe a partial write.
/// The lock is held across the rewrite which serializes all writers.
pub struct MetadataRegistry {
    path: PathBuf,
    root: PathBuf,
    files: Mutex<Vec<FileRecord>>,
    dirty: AtomicBool,
}

impl MetadataRegistry {
    /// Loads the registry from `path`.
    ///
    /// A missing artifact starts an empty registry. An unreadable one is an error:
    /// discarding it would lose every id and download count.
    pub fn open<P: Into<PathBuf>, R: Into<PathBuf>>(path: P, root: R) -> Result<Self> {
        let path = path.into();
        let mut missing = false;
        let files = match fs::read_to_string(&path) {
            Ok(data) => {
                let snapshot: Snapshot =
                    serde_json::from_str(&data).map_err(|source| Error::CorruptMetadata {
                        path: path.display().to_string(),
                        source,
                    })?;
                tracing::info!("loaded {} file records", snapshot.files.len());
                snapshot.files
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("metadata file {} does not exist, starting empty", path.display());
                missing = true;
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let registry = Self {
            path,
            root: root.into(),
            files: Mutex::new(files),
            dirty: AtomicBool::new(false),
        };
        if missing {
            registry.write(&[])?;
        }
        Ok(registry)
    }

    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<FileRecord> {
        self.files.lock().iter().find(|f| f.id == id).cloned()
    }

    #[must_use]
    pub fn find_by_path(&self, storage_path: &Path) -> Option<FileRecord> {
        self.files
            .lock()
            .iter()
            .find(|f| f.storage_path == storage_path)
            .cloned()
    }

    /// Creates or replaces the record of `storage_path`.
    ///
    /// An existing record keeps its id and download count; everything else,
    /// including the upload time, is replaced.
    pub fn upsert(
        &self,
        storage_path: &Path,
        original_name: &str,
        size: u64,
        fingerprint: Option<String>,
    ) -> FileRecord {
        let mut files = self.files.lock();
        let existing = files.iter().position(|f| f.storage_path == storage_path);

        let record = FileRecord {
            id: existing.map_or_else(|| Uuid::new_v4().to_string(), |i| files[i].id.clone()),
            storage_path: storage_path.to_path_buf(),
            relative_path: paths::relative_to(&self.root, storage_path),
            original_name: original_name.to_owned(),
            size,
            content_fingerprint: fingerprint,
            created_at: Utc::now(),
            download_count: existing.map_or(0, |i| files[i].download_count),
        };

        match existing {
            Some(i) => files[i] = record.clone(),
            None => files.push(record.clone()),
        }
        self.persist(&files);
        record
    }

    /// Returns the record of `storage_path`, creating an unhashed one when the
    /// path is not tracked yet. An existing record is never modified.
    pub fn register_if_absent(
        &self,
        storage_path: &Path,
        original_name: &str,
        size: u64,
    ) -> FileRecord {
        let mut files = self.files.lock();
        if let Some(existing) = files.iter().find(|f| f.storage_path == storage_path) {
            return existing.clone();
        }

        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            storage_path: storage_path.to_path_buf(),
            relative_path: paths::relative_to(&self.root, storage_path),
            original_name: original_name.to_owned(),
            size,
            content_fingerprint: None,
            created_at: Utc::now(),
            download_count: 0,
        };
        files.push(record.clone());
        self.persist(&files);
        record
    }

    /// Removes the record of exactly `storage_path`.
    pub fn delete_by_path(&self, storage_path: &Path) -> bool {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|f| f.storage_path != storage_path);
        let removed = files.len() != before;
        if removed {
            self.persist(&files);
        }
        removed
    }

    /// Removes every record at or below `prefix`.
    ///
    /// Matching is done per path component, so `/a/b` never matches `/a/bc`.
    pub fn delete_paths_under_prefix(&self, prefix: &Path) -> usize {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|f| !f.storage_path.starts_with(prefix));
        let removed = before - files.len();
        if removed > 0 {
            self.persist(&files);
        }
        removed
    }

    /// Bumps the download counter. Unknown ids are ignored.
    pub fn increment_download_count(&self, id: &str) -> Option<u64> {
        let mut files = self.files.lock();
        let record = files.iter_mut().find(|f| f.id == id)?;
        record.download_count += 1;
        let count = record.download_count;
        self.persist(&files);
        Some(count)
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let files = self.files.lock();
        Stats {
            total_files: files.len() as u64,
            total_size: files.iter().map(|f| f.size).sum(),
            total_downloads: files.iter().map(|f| f.download_count).sum(),
        }
    }

    #[must_use]
    pub fn all(&self) -> Vec<FileRecord> {
        self.files.lock().clone()
    }

    /// True while the last rewrite of the artifact failed. The in-memory
    /// records stay authoritative and the next mutation retries the write.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn persist(&self, files: &[FileRecord]) {
        match self.write(files) {
            Ok(()) => self.dirty.store(false, Ordering::SeqCst),
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                tracing::error!(
                    "failed to persist {} file records to {}: {e}. Changes are only held in memory",
                    files.len(),
                    self.path.display()
                );
            }
        }
    }

    fn write(&self, files: &[FileRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let snapshot = SnapshotRef { files };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    files: &'a [FileRecord],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        file: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let file = dir.path().join("file-info.json");
        Fixture {
            _dir: dir,
            root,
            file,
        }
    }

    #[test]
    fn open_missing_artifact_is_empty() {
        // Arrange
        let f = fixture();

        // Act
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();

        // Assert
        assert!(registry.all().is_empty());
        assert!(f.file.exists());
    }

    #[test]
    fn open_corrupt_artifact_fails() {
        // Arrange
        let f = fixture();
        fs::write(&f.file, b"{ not json").unwrap();

        // Act
        let result = MetadataRegistry::open(&f.file, &f.root);

        // Assert
        assert!(matches!(result, Err(Error::CorruptMetadata { .. })));
        assert_eq!(fs::read(&f.file).unwrap(), b"{ not json");
    }

    #[test]
    fn upsert_preserves_id_and_download_count() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        let path = f.root.join("docs").join("a.txt");
        let first = registry.upsert(&path, "a.txt", 10, Some("h1".to_owned()));
        registry.increment_download_count(&first.id);
        registry.increment_download_count(&first.id);

        // Act
        let second = registry.upsert(&path, "a.txt", 20, Some("h2".to_owned()));
        let third = registry.upsert(&path, "a.txt", 30, None);

        // Assert
        assert_eq!(second.id, first.id);
        assert_eq!(third.id, first.id);
        assert_eq!(third.download_count, 2);
        assert_eq!(third.size, 30);
        assert_eq!(third.relative_path, "docs/a.txt");
        assert!(second.created_at >= first.created_at);
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn register_if_absent_keeps_uploaded_record() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        let path = f.root.join("a.bin");
        let uploaded = registry.upsert(&path, "original.bin", 25, Some("h1".to_owned()));

        // Act
        let scanned = registry.register_if_absent(&path, "a.bin", 99);

        // Assert
        assert_eq!(scanned, uploaded);
        let stored = registry.find_by_path(&path).unwrap();
        assert_eq!(stored.content_fingerprint.as_deref(), Some("h1"));
        assert_eq!(stored.original_name, "original.bin");
        assert_eq!(stored.created_at, uploaded.created_at);
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn register_if_absent_creates_unhashed_record() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        let path = f.root.join("docs/b.txt");

        // Act
        let first = registry.register_if_absent(&path, "b.txt", 7);
        let second = registry.register_if_absent(&path, "b.txt", 7);

        // Assert
        assert_eq!(first.id, second.id);
        assert_eq!(first.content_fingerprint, None);
        assert_eq!(first.relative_path, "docs/b.txt");
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn failed_write_marks_dirty_until_next_mutation_succeeds() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        fs::remove_file(&f.file).unwrap();
        fs::create_dir(&f.file).unwrap();

        // Act
        registry.upsert(&f.root.join("a"), "a", 1, None);
        let dirty_while_blocked = registry.is_dirty();
        fs::remove_dir(&f.file).unwrap();
        registry.upsert(&f.root.join("b"), "b", 2, None);

        // Assert
        assert!(dirty_while_blocked);
        assert!(!registry.is_dirty());
        let reopened = MetadataRegistry::open(&f.file, &f.root).unwrap();
        assert_eq!(reopened.all().len(), 2);
        assert!(reopened.find_by_path(&f.root.join("a")).is_some());
    }

    #[test]
    fn records_survive_reopen() {
        // Arrange
        let f = fixture();
        let id = {
            let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
            let record = registry.upsert(&f.root.join("a"), "a", 5, Some(String::new()));
            registry.increment_download_count(&record.id);
            record.id
        };

        // Act
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();

        // Assert
        let record = registry.find_by_id(&id).unwrap();
        assert_eq!(record.download_count, 1);
        assert_eq!(record.content_fingerprint, Some(String::new()));
    }

    #[test]
    fn unhashed_and_empty_fingerprint_stay_distinct() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        registry.upsert(&f.root.join("scanned"), "scanned", 1, None);
        registry.upsert(&f.root.join("uploaded"), "uploaded", 1, Some(String::new()));

        // Act
        let reopened = MetadataRegistry::open(&f.file, &f.root).unwrap();

        // Assert
        let scanned = reopened.find_by_path(&f.root.join("scanned")).unwrap();
        let uploaded = reopened.find_by_path(&f.root.join("uploaded")).unwrap();
        assert_eq!(scanned.content_fingerprint, None);
        assert_eq!(uploaded.content_fingerprint, Some(String::new()));
    }

    #[test]
    fn increment_unknown_id_is_noop() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();

        // Act
        let count = registry.increment_download_count("missing");

        // Assert
        assert!(count.is_none());
        assert_eq!(registry.stats(), Stats::default());
    }

    #[test]
    fn delete_under_prefix_respects_segments() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        registry.upsert(&f.root.join("a/b/x"), "x", 1, None);
        registry.upsert(&f.root.join("a/b/c/y"), "y", 1, None);
        registry.upsert(&f.root.join("a/bc/z"), "z", 1, None);
        registry.upsert(&f.root.join("a/b.txt"), "b.txt", 1, None);

        // Act
        let removed = registry.delete_paths_under_prefix(&f.root.join("a/b"));

        // Assert
        assert_eq!(removed, 2);
        assert!(registry.find_by_path(&f.root.join("a/bc/z")).is_some());
        assert!(registry.find_by_path(&f.root.join("a/b.txt")).is_some());
    }

    #[test]
    fn delete_by_path_removes_one() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        registry.upsert(&f.root.join("a"), "a", 1, None);
        registry.upsert(&f.root.join("b"), "b", 1, None);

        // Act
        let removed = registry.delete_by_path(&f.root.join("a"));
        let again = registry.delete_by_path(&f.root.join("a"));

        // Assert
        assert!(removed);
        assert!(!again);
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn stats_aggregate_all_records() {
        // Arrange
        let f = fixture();
        let registry = MetadataRegistry::open(&f.file, &f.root).unwrap();
        let a = registry.upsert(&f.root.join("a"), "a", 10, None);
        registry.upsert(&f.root.join("b"), "b", 32, None);
        registry.increment_download_count(&a.id);

        // Act
        let stats = registry.stats();

        // Assert
        assert_eq!(
            stats,
            Stats {
                total_files: 2,
                total_size: 42,
                total_downloads: 1
            }
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        // Arrange
        let f = fixture();
        let registry = Arc::new(MetadataRegistry::open(&f.file, &f.root).unwrap());
        let id = registry.upsert(&f.root.join("a"), "a", 1, None).id;

        // Act
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                thread::spawn(move || {
                    registry.increment_download_count(&id);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert
        let reopened = MetadataRegistry::open(&f.file, &f.root).unwrap();
        assert_eq!(reopened.find_by_id(&id).unwrap().download_count, 16);
        assert!(!registry.is_dirty());
    }
}
