use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{UploadSession, total_chunks};
use crate::error::{Error, Result};

/// Data needed to open a session.
pub struct NewSession {
    pub filename: String,
    pub fingerprint: String,
    pub chunk_size: u64,
    pub file_size: u64,
    pub relative_path: PathBuf,
    pub target_path: PathBuf,
}

/// In-memory table of active upload sessions.
///
/// Chunk bookkeeping locks the individual session so unrelated uploads never
/// wait on each other. Opening a session and releasing the chunks of a
/// fingerprint both run under the table write lock, so a release never purges
/// chunks a session being opened has already counted as stored.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session seeded with the chunks `stored` reports for its content.
    ///
    /// `stored` runs under the table lock and sees the session before it is
    /// registered. Indices outside the session are dropped. Fails while a live
    /// session uploads the same content with another chunk size.
    pub fn create<F>(&self, new: NewSession, stored: F) -> Result<UploadSession>
    where
        F: FnOnce(&UploadSession) -> Result<Vec<u64>>,
    {
        let mut session = UploadSession {
            id: Uuid::new_v4().to_string(),
            filename: new.filename,
            fingerprint: new.fingerprint,
            chunk_size: new.chunk_size,
            total_chunks: total_chunks(new.file_size, new.chunk_size),
            file_size: new.file_size,
            relative_path: new.relative_path,
            target_path: new.target_path,
            uploaded: BTreeSet::new(),
            created_at: Utc::now(),
        };

        let mut sessions = self.sessions.write();
        let other_size = sessions
            .values()
            .map(|s| s.lock())
            .find(|s| s.fingerprint == session.fingerprint && s.chunk_size != session.chunk_size)
            .map(|s| s.chunk_size);
        if let Some(other) = other_size {
            return Err(Error::Validation(format!(
                "content {} is already being uploaded with chunk size {other}",
                session.fingerprint
            )));
        }
        let total = session.total_chunks;
        session.uploaded = stored(&session)?.into_iter().filter(|i| *i < total).collect();
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        drop(sessions);

        tracing::info!("created upload session {}", session.id);
        Ok(session)
    }

    /// Marks a chunk as uploaded and returns the number of distinct chunks recorded.
    pub fn record_chunk(&self, id: &str, index: u64) -> Result<u64> {
        let session = self.entry(id)?;
        let mut session = session.lock();
        if index >= session.total_chunks {
            return Err(Error::Validation(format!(
                "chunk index {index} out of range, session has {} chunks",
                session.total_chunks
            )));
        }
        session.uploaded.insert(index);
        Ok(session.uploaded.len() as u64)
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> Result<UploadSession> {
        let session = self.entry(id)?;
        let snapshot = session.lock().clone();
        Ok(snapshot)
    }

    /// Removes a session. Chunk storage is left untouched.
    pub fn discard(&self, id: &str) -> Option<UploadSession> {
        let removed = self.sessions.write().remove(id)?;
        tracing::info!("discarded upload session {id}");
        let snapshot = removed.lock().clone();
        Some(snapshot)
    }

    /// Runs `purge` unless a live session still references `fingerprint`.
    /// Returns whether it ran.
    pub fn release<F: FnOnce()>(&self, fingerprint: &str, purge: F) -> bool {
        let sessions = self.sessions.write();
        if sessions.values().any(|s| s.lock().fingerprint == fingerprint) {
            return false;
        }
        purge();
        true
    }

    /// Ids of sessions created longer than `max_age` ago.
    #[must_use]
    pub fn stale(&self, max_age: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_age;
        self.sessions
            .read()
            .iter()
            .filter(|(_, s)| s.lock().created_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<UploadSession>>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("upload session {id}")))
    }
}
