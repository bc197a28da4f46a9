#![allow(clippy::unused_async)]
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::file_reply::FileReply;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{Stream, TryStreamExt};
use futures_util::StreamExt;
use kernel::{
    BatchDeleteRequest, BatchDeleteResult, ChunkReceipt, CompleteUploadRequest,
    CompleteUploadResponse, DeleteResult, ErrorReply, InitUploadRequest, InitUploadResponse,
    ListQuery, Stats, TreeNode,
};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart form accepted by [`upload_chunk`].
#[derive(serde::Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct ChunkForm {
    upload_id: String,
    chunk_index: u64,
    #[schema(format = Binary, value_type = String)]
    chunk: Vec<u8>,
}

/// Opens an upload session.
#[utoipa::path(
    post,
    path = "/api/upload/init",
    request_body = InitUploadRequest,
    responses(
        (status = 200, description = "Session opened, lists chunks already stored", body = InitUploadResponse),
        (status = 400, description = "Invalid request", body = ErrorReply),
        (status = 409, description = "File exists and force was not set", body = ErrorReply)
    ),
    tag = "upload",
)]
pub async fn init_upload(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>> {
    execute(&engine, move |engine| engine.init_upload(&req))
        .await
        .map(Json)
}

/// Stores one chunk. Multipart fields: `uploadId`, `chunkIndex`, `chunk`.
#[utoipa::path(
    post,
    path = "/api/upload/chunk",
    request_body(content = ChunkForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk stored", body = ChunkReceipt),
        (status = 400, description = "Malformed form", body = ErrorReply),
        (status = 404, description = "Unknown upload session", body = ErrorReply)
    ),
    tag = "upload",
)]
pub async fn upload_chunk(
    State(engine): State<Arc<Engine>>,
    mut multipart: Multipart,
) -> Result<Json<ChunkReceipt>> {
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<u64> = None;
    let mut chunk: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "uploadId" => {
                upload_id = Some(field.text().await.map_err(|e| Error::Validation(e.to_string()))?);
            }
            "chunkIndex" => {
                let text = field.text().await.map_err(|e| Error::Validation(e.to_string()))?;
                let index = text
                    .trim()
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid chunk index '{text}'")))?;
                chunk_index = Some(index);
            }
            "chunk" => {
                let (data, read_bytes) = read_from_stream(field).await?;
                tracing::debug!("chunk field read: {read_bytes} bytes");
                chunk = Some(data);
            }
            other => tracing::debug!("ignoring form field '{other}'"),
        }
    }

    let (Some(upload_id), Some(index), Some(data)) = (upload_id, chunk_index, chunk) else {
        return Err(Error::Validation(
            "uploadId, chunkIndex and chunk are required".to_owned(),
        ));
    };

    execute(&engine, move |engine| engine.upload_chunk(&upload_id, index, &data))
        .await
        .map(Json)
}

/// Merges all chunks into the final file.
#[utoipa::path(
    post,
    path = "/api/upload/complete",
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "File stored", body = CompleteUploadResponse),
        (status = 404, description = "Unknown session or missing chunk", body = ErrorReply),
        (status = 409, description = "Same content is already being merged", body = ErrorReply)
    ),
    tag = "upload",
)]
pub async fn complete_upload(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>> {
    execute(&engine, move |engine| engine.complete_upload(&req))
        .await
        .map(Json)
}

/// Abandons an upload session and drops its chunks.
#[utoipa::path(
    delete,
    path = "/api/upload/{upload_id}",
    responses(
        (status = 200, description = "Session abandoned", body = DeleteResult),
        (status = 404, description = "Unknown upload session", body = ErrorReply)
    ),
    tag = "upload",
    params(
        ("upload_id" = String, Path, description = "Upload session id")
    ),
)]
pub async fn abandon_upload(
    Path(upload_id): Path<String>,
    State(engine): State<Arc<Engine>>,
) -> Result<Json<DeleteResult>> {
    execute(&engine, move |engine| engine.abandon_upload(&upload_id)).await?;
    Ok(Json(DeleteResult { success: true }))
}

/// Lists the file tree
#[utoipa::path(
    get,
    path = "/api/files",
    params(ListQuery),
    responses(
        (status = 200, description = "File tree", body = [TreeNode]),
        (status = 400, description = "Invalid path", body = ErrorReply)
    ),
    tag = "files",
)]
pub async fn list_files(
    Query(query): Query<ListQuery>,
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<TreeNode>>> {
    execute(&engine, move |engine| {
        engine.list_files(query.path.as_deref(), query.search.as_deref())
    })
    .await
    .map(Json)
}

/// Deletes a file, or a directory by its `dir-` id
#[utoipa::path(
    delete,
    path = "/api/files/{file_id}",
    responses(
        (status = 200, description = "File deleted", body = DeleteResult),
        (status = 404, description = "File not found", body = ErrorReply)
    ),
    tag = "files",
    params(
        ("file_id" = String, Path, description = "File id")
    ),
)]
pub async fn delete_file(
    Path(file_id): Path<String>,
    State(engine): State<Arc<Engine>>,
) -> Result<Json<DeleteResult>> {
    execute(&engine, move |engine| engine.delete_file(&file_id)).await?;
    Ok(Json(DeleteResult { success: true }))
}

/// Deletes several files. Always answers 200 with per id outcome.
#[utoipa::path(
    delete,
    path = "/api/files/batch",
    request_body = BatchDeleteRequest,
    responses(
        (status = 200, description = "Batch processed", body = BatchDeleteResult),
    ),
    tag = "files",
)]
pub async fn batch_delete(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResult>> {
    execute(&engine, move |engine| Ok(engine.batch_delete(&req.file_ids)))
        .await
        .map(Json)
}

/// Gets file binary content by file id
#[utoipa::path(
    get,
    path = "/api/download/{file_id}",
    responses(
        (status = 200, response = FileReply),
        (status = 404, description = "File not found", body = ErrorReply)
    ),
    tag = "files",
    params(
        ("file_id" = String, Path, description = "File id")
    ),
)]
pub async fn download(
    Path(file_id): Path<String>,
    State(engine): State<Arc<Engine>>,
) -> Result<impl IntoResponse> {
    let download = execute(&engine, move |engine| engine.resolve_download(&file_id)).await?;
    let file = tokio::fs::File::from_std(download.file);
    tracing::info!(
        "download {} ({} bytes)",
        download.record.relative_path,
        download.len
    );
    Ok((StatusCode::OK, FileReply::new(file, download.len, download.record)))
}

/// Aggregated statistics
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Statistics over all tracked files", body = Stats),
    ),
    tag = "files",
)]
pub async fn stats(State(engine): State<Arc<Engine>>) -> Json<Stats> {
    Json(engine.stats())
}

/// Runs a blocking engine call off the async workers.
async fn execute<F, R>(engine: &Arc<Engine>, action: F) -> Result<R>
where
    F: FnOnce(&Engine) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let engine = Arc::clone(engine);
    let start = Instant::now();
    let result = tokio::task::spawn_blocking(move || action(&engine))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?;
    tracing::debug!("engine call time: {:?}", start.elapsed());
    result
}

async fn read_from_stream<S, E>(stream: S) -> io::Result<(Vec<u8>, usize)>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + StreamExt,
    E: Sync + std::error::Error + Send + 'static,
{
    // Convert the stream into an `AsyncRead`.
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut buffer = Vec::new();

    let copied_bytes = tokio::io::copy(&mut body_reader, &mut buffer).await?;
    let copied_bytes = usize::try_from(copied_bytes).unwrap_or(usize::MAX);
    Ok((buffer, copied_bytes))
}
