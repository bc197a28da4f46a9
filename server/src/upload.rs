use chrono::Duration;
use kernel::{
    ChunkReceipt, CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest,
    InitUploadResponse,
};

use crate::domain::UploadSession;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::paths;
use crate::sessions::NewSession;

impl Engine {
    /// Opens an upload session and reports the chunks already stored for the
    /// same content so the client only sends what is missing.
    pub fn init_upload(&self, req: &InitUploadRequest) -> Result<InitUploadResponse> {
        if req.chunk_size == 0 {
            return Err(Error::Validation("chunk size must be positive".to_owned()));
        }
        let filename = paths::sanitize_name(&req.filename)?;
        let folder = paths::sanitize_relative(req.folder_path.as_deref().unwrap_or_default())?;
        let relative_path = folder.join(&filename);
        let target_path = self.upload_dir.join(&relative_path);

        if !req.force.unwrap_or(false) && target_path.exists() {
            return Err(Error::Conflict(paths::to_slash(&relative_path)));
        }

        let session = self.sessions.create(
            NewSession {
                filename,
                fingerprint: req.file_hash.clone(),
                chunk_size: req.chunk_size,
                file_size: req.file_size,
                relative_path,
                target_path,
            },
            |session| self.stored_chunks(session),
        )?;
        let existing: Vec<u64> = session.uploaded.iter().copied().collect();

        tracing::info!(
            "init upload: {} ({} bytes, {} chunks, {} already stored)",
            session.filename,
            session.file_size,
            session.total_chunks,
            existing.len()
        );

        Ok(InitUploadResponse {
            upload_id: session.id,
            chunks: session.total_chunks,
            existing_chunks: existing,
        })
    }

    /// Stores one chunk and records it against its session.
    ///
    /// A failed write only fails this chunk; the session stays usable.
    pub fn upload_chunk(&self, upload_id: &str, index: u64, data: &[u8]) -> Result<ChunkReceipt> {
        let session = self.sessions.get(upload_id)?;
        let expected = session.chunk_len(index).ok_or_else(|| {
            Error::Validation(format!(
                "chunk index {index} out of range, file has {} chunks",
                session.total_chunks
            ))
        })?;
        if data.len() as u64 != expected {
            return Err(Error::Validation(format!(
                "chunk {index} has {} bytes, expected {expected}",
                data.len()
            )));
        }

        self.chunks.save_chunk(&session.fingerprint, index, data)?;
        let uploaded = self.sessions.record_chunk(upload_id, index)?;

        Ok(ChunkReceipt {
            uploaded,
            total: session.total_chunks,
        })
    }

    /// Merges the chunks of a session into its target file and records it.
    ///
    /// On failure the session is kept so completion can be retried without
    /// sending the chunks again.
    pub fn complete_upload(&self, req: &CompleteUploadRequest) -> Result<CompleteUploadResponse> {
        let session = self.sessions.get(&req.upload_id)?;
        if req.file_hash != session.fingerprint {
            return Err(Error::Validation(format!(
                "fingerprint {} does not match the session",
                req.file_hash
            )));
        }

        self.assembler.merge(
            &self.chunks,
            &session.fingerprint,
            session.total_chunks,
            session.file_size,
            &session.target_path,
        )?;

        let original_name = if req.filename.is_empty() {
            session.filename.as_str()
        } else {
            req.filename.as_str()
        };
        let record = self.registry.upsert(
            &session.target_path,
            original_name,
            session.file_size,
            Some(session.fingerprint.clone()),
        );

        self.sessions.discard(&session.id);
        self.release_chunks(&session.fingerprint);

        tracing::info!("completed upload: {original_name} -> {}", record.id);

        Ok(CompleteUploadResponse {
            download_url: format!("/api/download/{}", record.id),
            file_id: record.id,
            filename: original_name.to_owned(),
            path: record.relative_path,
        })
    }

    /// Drops a session and its stored chunks.
    pub fn abandon_upload(&self, upload_id: &str) -> Result<()> {
        let session = self
            .sessions
            .discard(upload_id)
            .ok_or_else(|| Error::NotFound(format!("upload session {upload_id}")))?;
        self.release_chunks(&session.fingerprint);
        Ok(())
    }

    /// Abandons every session older than `max_age` and returns how many were dropped.
    pub fn reap_stale(&self, max_age: Duration) -> usize {
        let stale = self.sessions.stale(max_age);
        let mut reaped = 0;
        for id in stale {
            if self.abandon_upload(&id).is_ok() {
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!("reaped {reaped} stale upload sessions");
        }
        reaped
    }

    // Chunks are shared by every session of the same content.
    fn release_chunks(&self, fingerprint: &str) {
        self.sessions.release(fingerprint, || {
            if let Err(e) = self.chunks.purge(fingerprint) {
                tracing::warn!("failed to purge chunks of {fingerprint}: {e}");
            }
        });
    }

    /// Stored chunks of the session's content. Chunks cut with another chunk
    /// size are dropped since their indices cover other byte ranges.
    fn stored_chunks(&self, session: &UploadSession) -> Result<Vec<u64>> {
        if self.chunks.chunk_size(&session.fingerprint)? != Some(session.chunk_size) {
            self.chunks.reset(&session.fingerprint, session.chunk_size)?;
            return Ok(Vec::new());
        }
        self.chunks.list_chunks(&session.fingerprint)
    }
}
