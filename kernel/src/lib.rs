#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Request that opens a new upload session.
///
/// The client computes the content fingerprint before sending any chunk so the
/// server can report chunks that already landed for the same content.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    /// Name of the file as it will appear in the store
    pub filename: String,
    /// Total size of the file in bytes
    pub file_size: u64,
    /// Fingerprint of the complete file content
    pub file_hash: String,
    /// Size of every chunk except possibly the last one
    pub chunk_size: u64,
    /// Folder relative to the storage root, root when absent
    #[serde(default)]
    pub folder_path: Option<String>,
    /// Overwrite an existing file at the target path
    #[serde(default)]
    pub force: Option<bool>,
}

/// Reply to [`InitUploadRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    /// Opaque session token used by the following chunk and complete calls
    pub upload_id: String,
    /// Number of chunks the file is split into
    pub chunks: u64,
    /// Chunk indices already stored for this fingerprint, ascending
    pub existing_chunks: Vec<u64>,
}

/// Progress of a session after a chunk has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChunkReceipt {
    /// Distinct chunks recorded against the session
    pub uploaded: u64,
    /// Total chunks expected
    pub total: u64,
}

/// Request that merges all uploaded chunks into the final file.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub filename: String,
    pub file_hash: String,
}

/// Reply to [`CompleteUploadRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    /// Stable identifier of the stored file
    pub file_id: String,
    /// Original file name
    pub filename: String,
    /// Path relative to the storage root, forward slash separated
    pub path: String,
    /// Relative URL the file can be downloaded from
    pub download_url: String,
}

/// Kind of a [`TreeNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// Entry of a file listing.
///
/// Directory sizes are the recursive sum of the files below them. Children are
/// only present on directories.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// File id, or `dir-<path>` for directories
    pub id: String,
    /// Last path component
    pub name: String,
    /// Path relative to the storage root, forward slash separated
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Size in bytes
    pub size: u64,
    /// Upload time of a file or modification time of a directory
    pub upload_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_count: Option<u64>,
    /// Content fingerprint, `null` for directories and for files never uploaded through the store
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(no_recursion)]
    pub children: Option<Vec<TreeNode>>,
}

/// Listing query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Folder to list, storage root when absent
    pub path: Option<String>,
    /// Case insensitive name filter
    pub search: Option<String>,
}

/// Aggregated statistics over all tracked files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_files: u64,
    /// Sum of all file sizes in bytes
    pub total_size: u64,
    pub total_downloads: u64,
}

/// Result of a single delete operation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
pub struct DeleteResult {
    pub success: bool,
}

/// Request that deletes several files at once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub file_ids: Vec<String>,
}

/// Result of a batch delete.
///
/// Every requested id is accounted for exactly once, either in `deleted` or in
/// `failed` with a matching message in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BatchDeleteResult {
    /// Number of ids deleted
    pub deleted: usize,
    /// Number of ids that could not be deleted
    pub failed: usize,
    /// One message per failed id
    pub errors: Vec<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorReply {
    pub error: String,
}
