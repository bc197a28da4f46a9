use std::path::{Path, PathBuf};

use comfy_table::{
    Attribute, Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_HORIZONTAL_ONLY,
};
use futures::StreamExt;
use kernel::{
    BatchDeleteResult, ChunkReceipt, CompleteUploadResponse, DeleteResult, ErrorReply,
    InitUploadResponse, NodeKind, Stats, TreeNode,
};
use reqwest::{Client, Response, header::CONTENT_DISPOSITION};
use resource::Resource;
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub use error::{Error, Result};

mod error;
pub mod fingerprint;
pub mod resource;
pub mod uploader;

/// Default size of one uploaded chunk.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;
/// Default number of chunks sent at the same time.
pub const CONCURRENCY: usize = 3;

pub struct UploadParams {
    pub uri: String,
    pub file: PathBuf,
    /// Folder on the server, storage root when absent
    pub folder: Option<String>,
    pub force: bool,
    pub chunk_size: u64,
    pub concurrency: usize,
}

/// Uploads a file in chunks, skipping chunks the server already holds for the
/// same content.
///
/// `progress` receives the number of chunks on the server and the total.
pub async fn upload_file<P>(
    params: &UploadParams,
    mut progress: P,
) -> Result<CompleteUploadResponse>
where
    P: FnMut(u64, u64),
{
    let file_size = tokio::fs::metadata(&params.file).await?.len();
    let filename = params
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_hash =
        fingerprint::fingerprint_file(&params.file, fingerprint::HASH_BLOCK_SIZE).await?;
    let chunk_size = params.chunk_size.max(1);

    let client = Client::new();
    let init: InitUploadResponse = check(
        client
            .post(endpoint(&params.uri, "api/upload/init")?)
            .json(&json!({
                "filename": filename,
                "fileSize": file_size,
                "fileHash": file_hash,
                "chunkSize": chunk_size,
                "folderPath": params.folder,
                "force": params.force,
            }))
            .send()
            .await?,
    )
    .await?
    .json()
    .await?;

    let total = init.chunks;
    let already = init.existing_chunks.len() as u64;
    let pending: Vec<u64> = (0..total)
        .filter(|i| init.existing_chunks.binary_search(i).is_err())
        .collect();
    progress(already, total);

    let chunk_uri = endpoint(&params.uri, "api/upload/chunk")?;
    uploader::dispatch(
        pending,
        params.concurrency,
        |index| {
            let client = &client;
            let chunk_uri = &chunk_uri;
            let upload_id = &init.upload_id;
            async move {
                let data = read_chunk(&params.file, index, chunk_size, file_size).await?;
                let part =
                    reqwest::multipart::Part::bytes(data).file_name(format!("chunk_{index}"));
                let form = reqwest::multipart::Form::new()
                    .text("uploadId", upload_id.clone())
                    .text("chunkIndex", index.to_string())
                    .part("chunk", part);
                let response = client.post(chunk_uri).multipart(form).send().await?;
                let _: ChunkReceipt = check(response).await?.json().await?;
                Ok::<(), Error>(())
            }
        },
        |completed| progress(already + completed, total),
    )
    .await?;

    let complete = check(
        client
            .post(endpoint(&params.uri, "api/upload/complete")?)
            .json(&json!({
                "uploadId": init.upload_id,
                "filename": filename,
                "fileHash": file_hash,
            }))
            .send()
            .await?,
    )
    .await?
    .json()
    .await?;
    Ok(complete)
}

pub async fn list_files(
    uri: &str,
    path: Option<&str>,
    search: Option<&str>,
) -> Result<Vec<TreeNode>> {
    let mut query = Vec::new();
    if let Some(path) = path {
        query.push(("path", path));
    }
    if let Some(search) = search {
        query.push(("search", search));
    }
    let client = Client::new();
    let response = client
        .get(endpoint(uri, "api/files")?)
        .query(&query)
        .send()
        .await?;
    Ok(check(response).await?.json().await?)
}

pub async fn stats(uri: &str) -> Result<Stats> {
    let response = Client::new().get(endpoint(uri, "api/stats")?).send().await?;
    Ok(check(response).await?.json().await?)
}

/// Deletes one file or directory by id.
pub async fn delete_file(uri: &str, id: &str) -> Result<DeleteResult> {
    let mut resource = Resource::new(uri)?;
    resource.append_path("api/files").append_segment(id);
    let response = Client::new().delete(resource.to_string()).send().await?;
    Ok(check(response).await?.json().await?)
}

pub async fn batch_delete(uri: &str, ids: &[String]) -> Result<BatchDeleteResult> {
    let response = Client::new()
        .delete(endpoint(uri, "api/files/batch")?)
        .json(&json!({ "fileIds": ids }))
        .send()
        .await?;
    Ok(check(response).await?.json().await?)
}

/// Downloads a file into `output`, or into the current directory under the
/// name the server suggests. Returns the written path and its size.
pub async fn download(uri: &str, id: &str, output: Option<&Path>) -> Result<(PathBuf, u64)> {
    let mut resource = Resource::new(uri)?;
    resource.append_path("api/download").append_segment(id);
    let response = check(Client::new().get(resource.to_string()).send().await?).await?;

    let target = match output {
        Some(path) if path.is_dir() => path.join(suggested_name(&response, id)),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(suggested_name(&response, id)),
    };

    let mut file = File::create(&target).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(bytes) = stream.next().await {
        let bytes = bytes?;
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    Ok((target, written))
}

/// Renders a listing as an indented table.
#[must_use]
pub fn tree_table(nodes: &[TreeNode]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
            Cell::new("Downloads").add_attribute(Attribute::Bold),
            Cell::new("Uploaded").add_attribute(Attribute::Bold),
            Cell::new("Id").add_attribute(Attribute::Bold),
        ]);
    add_rows(&mut table, nodes, 0);
    table
}

fn add_rows(table: &mut Table, nodes: &[TreeNode], depth: usize) {
    for node in nodes {
        let name = match node.kind {
            NodeKind::Directory => format!("{}{}/", "  ".repeat(depth), node.name),
            NodeKind::File => format!("{}{}", "  ".repeat(depth), node.name),
        };
        let downloads = node
            .download_count
            .map(|c| c.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(name),
            Cell::new(node.size).set_alignment(CellAlignment::Right),
            Cell::new(downloads).set_alignment(CellAlignment::Right),
            Cell::new(node.upload_time.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&node.id),
        ]);
        if let Some(children) = &node.children {
            add_rows(table, children, depth + 1);
        }
    }
}

#[must_use]
pub fn stats_table(stats: &Stats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_header(vec![
            Cell::new("Files").add_attribute(Attribute::Bold),
            Cell::new("Total size").add_attribute(Attribute::Bold),
            Cell::new("Downloads").add_attribute(Attribute::Bold),
        ])
        .add_row(vec![
            Cell::new(stats.total_files),
            Cell::new(stats.total_size),
            Cell::new(stats.total_downloads),
        ]);
    table
}

fn endpoint(uri: &str, path: &str) -> Result<String> {
    let mut resource = Resource::new(uri)?;
    resource.append_path(path);
    Ok(resource.to_string())
}

/// Turns a non-success reply into [`Error::Status`] carrying the server message.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorReply>(&body)
        .map(|r| r.error)
        .unwrap_or(body);
    Err(Error::Status { status, message })
}

async fn read_chunk(path: &Path, index: u64, chunk_size: u64, file_size: u64) -> Result<Vec<u8>> {
    let start = index * chunk_size;
    let len = chunk_size.min(file_size.saturating_sub(start));
    let mut file = File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let mut data = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
    file.read_exact(&mut data).await?;
    Ok(data)
}

fn suggested_name(response: &Response, fallback: &str) -> String {
    response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(attachment_name)
        .unwrap_or_else(|| fallback.to_owned())
}

/// File name out of a `Content-Disposition` header, preferring the UTF-8
/// `filename*` form. Path separators are never trusted.
fn attachment_name(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for param in header.split(';').map(str::trim) {
        if let Some(value) = param.strip_prefix("filename*=") {
            let encoded = value.strip_prefix("UTF-8''").unwrap_or(value);
            extended = urlencoding::decode(encoded).ok().map(|v| v.into_owned());
        } else if let Some(value) = param.strip_prefix("filename=") {
            plain = Some(value.trim_matches('"').to_owned());
        }
    }
    extended
        .or(plain)
        .and_then(|n| n.rsplit(['/', '\\']).next().map(str::to_owned))
        .filter(|n| !n.is_empty() && n != "." && n != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case(r#"attachment; filename="a.bin""#, Some("a.bin"))]
    #[case(
        r#"attachment; filename="_.txt"; filename*=UTF-8''%D0%BF.txt"#,
        Some("п.txt")
    )]
    #[case(r#"attachment; filename="../../etc/passwd""#, Some("passwd"))]
    #[case(r#"attachment; filename="..""#, None)]
    #[case("inline", None)]
    fn attachment_name_tests(#[case] header: &str, #[case] expected: Option<&str>) {
        // Arrange

        // Act
        let name = attachment_name(header);

        // Assert
        assert_eq!(name.as_deref(), expected);
    }

    #[test]
    fn tree_table_indents_children() {
        // Arrange
        let file = TreeNode {
            id: "f1".to_owned(),
            name: "a.bin".to_owned(),
            path: "docs/a.bin".to_owned(),
            kind: NodeKind::File,
            size: 3,
            upload_time: Utc::now(),
            download_count: Some(2),
            hash: Some("h".to_owned()),
            children: None,
        };
        let dir = TreeNode {
            id: "dir-docs".to_owned(),
            name: "docs".to_owned(),
            path: "docs".to_owned(),
            kind: NodeKind::Directory,
            size: 3,
            upload_time: Utc::now(),
            download_count: None,
            hash: None,
            children: Some(vec![file]),
        };

        // Act
        let rendered = tree_table(&[dir]).to_string();

        // Assert
        assert!(rendered.contains("docs/"));
        assert!(rendered.contains("a.bin"));
        assert!(rendered.contains("dir-docs"));
    }

    #[tokio::test]
    async fn read_chunk_returns_short_last_chunk() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let content: Vec<u8> = (0..25u8).collect();
        std::fs::write(&path, &content).unwrap();

        // Act
        let last = read_chunk(&path, 2, 10, 25).await.unwrap();
        let first = read_chunk(&path, 0, 10, 25).await.unwrap();

        // Assert
        assert_eq!(last, content[20..]);
        assert_eq!(first, content[..10]);
    }
}
