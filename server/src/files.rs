use std::fs;
use std::io;
use std::path::Path;

use kernel::{BatchDeleteResult, Stats, TreeNode};

use crate::domain::FileRecord;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::paths;
use crate::tree::TreeBuilder;

const DIRECTORY_ID_PREFIX: &str = "dir-";

/// An opened stored file and its record.
pub struct Download {
    pub record: FileRecord,
    pub file: fs::File,
    pub len: u64,
}

impl Engine {
    /// Tree below `folder`, optionally narrowed to names containing `search`.
    pub fn list_files(&self, folder: Option<&str>, search: Option<&str>) -> Result<Vec<TreeNode>> {
        let folder = paths::sanitize_relative(folder.unwrap_or_default())?;
        let mut tree = TreeBuilder::new(&self.upload_dir, &self.registry).list(&folder);
        if let Some(term) = search {
            tree.filter(term);
        }
        Ok(tree.into_nodes())
    }

    /// Opens a stored file for download. The download is only counted once
    /// the file is open.
    pub fn resolve_download(&self, file_id: &str) -> Result<Download> {
        let mut record = self
            .registry
            .find_by_id(file_id)
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;
        let gone = || Error::NotFound(format!("file {file_id} is gone from disk"));

        let file = match fs::File::open(&record.storage_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(gone()),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(gone());
        }

        if let Some(count) = self.registry.increment_download_count(file_id) {
            record.download_count = count;
        }
        Ok(Download {
            record,
            file,
            len: meta.len(),
        })
    }

    /// Deletes a file by id, or a directory by its `dir-<path>` id together
    /// with every record below it.
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        if let Some(relative) = file_id.strip_prefix(DIRECTORY_ID_PREFIX) {
            let relative = paths::sanitize_relative(relative)?;
            if relative.as_os_str().is_empty() {
                return Err(Error::Validation("refusing to delete the storage root".to_owned()));
            }
            let full = self.upload_dir.join(relative);
            if full.is_dir() {
                return self.delete_path(&full);
            }
        }

        let record = self
            .registry
            .find_by_id(file_id)
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;
        self.delete_path(&record.storage_path)?;
        tracing::info!("deleted file: {}", record.original_name);
        Ok(())
    }

    /// Deletes every id independently. Each id ends up either in `deleted` or
    /// in `failed` with one message in `errors`.
    #[must_use]
    pub fn batch_delete(&self, file_ids: &[String]) -> BatchDeleteResult {
        let mut result = BatchDeleteResult::default();
        for id in file_ids {
            match self.delete_file(id) {
                Ok(()) => result.deleted += 1,
                Err(Error::NotFound(_)) => {
                    result.failed += 1;
                    result.errors.push(format!("file not found: {id}"));
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(format!("failed to delete {id}: {e}"));
                }
            }
        }
        tracing::info!(
            "batch delete: {} succeeded, {} failed",
            result.deleted,
            result.failed
        );
        result
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.registry.stats()
    }

    fn delete_path(&self, path: &Path) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(path)?;
                let removed = self.registry.delete_paths_under_prefix(path);
                tracing::info!("deleted directory {} with {removed} records", path.display());
            }
            Ok(_) => {
                fs::remove_file(path)?;
                self.registry.delete_by_path(path);
            }
            // already gone from disk, only the record is left
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.registry.delete_by_path(path);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
