use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upload attempt and the chunks that landed for it.
///
/// Chunks are stored by content fingerprint, not by session, so a new session
/// for the same content starts with the chunks a dropped one left behind.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub fingerprint: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub file_size: u64,
    /// Folder and file name below the storage root
    pub relative_path: PathBuf,
    pub target_path: PathBuf,
    pub uploaded: BTreeSet<u64>,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Expected length of the chunk at `index`, `None` when out of range.
    #[must_use]
    pub fn chunk_len(&self, index: u64) -> Option<u64> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index * self.chunk_size;
        Some(self.chunk_size.min(self.file_size - start))
    }
}

/// Number of chunks a file of `file_size` bytes splits into.
#[must_use]
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

/// Registry entry of a stored file.
///
/// `id` survives overwrites of the same path. `content_fingerprint` is `None`
/// for files discovered on disk that never went through the upload engine,
/// which is distinct from an uploaded file whose fingerprint is an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    #[serde(rename = "path")]
    pub storage_path: PathBuf,
    pub relative_path: String,
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "hash")]
    pub content_fingerprint: Option<String>,
    #[serde(rename = "uploadTime")]
    pub created_at: DateTime<Utc>,
    pub download_count: u64,
}
