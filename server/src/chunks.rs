use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const CHUNK_PREFIX: &str = "chunk_";
const LAYOUT_FILE: &str = "chunk-size";

/// Temporary chunk storage addressed by content fingerprint.
///
/// Every fingerprint owns one directory below the root holding files named
/// `chunk_<index>` and a `chunk-size` marker with the size they were cut
/// with. Blobs outlive the sessions that wrote them.
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores the bytes of one chunk, replacing any blob already there.
    pub fn save_chunk(&self, fingerprint: &str, index: u64, data: &[u8]) -> Result<()> {
        let dir = self.dir(fingerprint)?;
        fs::create_dir_all(&dir)?;

        // readers must never see a half written chunk
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.persist(dir.join(chunk_name(index))).map_err(|e| e.error)?;

        tracing::debug!("saved chunk {index} ({} bytes) for {fingerprint}", data.len());
        Ok(())
    }

    /// Indices stored for `fingerprint`, ascending. Unknown fingerprints have none.
    pub fn list_chunks(&self, fingerprint: &str) -> Result<Vec<u64>> {
        let dir = self.dir(fingerprint)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    pub fn chunk_path(&self, fingerprint: &str, index: u64) -> Result<PathBuf> {
        Ok(self.dir(fingerprint)?.join(chunk_name(index)))
    }

    /// Chunk size the stored chunks of `fingerprint` were cut with, `None`
    /// when nothing was recorded.
    pub fn chunk_size(&self, fingerprint: &str) -> Result<Option<u64>> {
        let path = self.dir(fingerprint)?.join(LAYOUT_FILE);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(data.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops every chunk of `fingerprint` and records `chunk_size` as the
    /// size the following chunks are cut with.
    pub fn reset(&self, fingerprint: &str, chunk_size: u64) -> Result<()> {
        self.purge(fingerprint)?;
        let dir = self.dir(fingerprint)?;
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(chunk_size.to_string().as_bytes())?;
        tmp.persist(dir.join(LAYOUT_FILE)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Removes every chunk of `fingerprint`. A missing directory is not an error.
    pub fn purge(&self, fingerprint: &str) -> Result<()> {
        let dir = self.dir(fingerprint)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!("purged chunks of {fingerprint}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every fingerprint directory and returns how many were removed.
    pub fn purge_all(&self) -> Result<usize> {
        fs::create_dir_all(&self.root)?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn dir(&self, fingerprint: &str) -> Result<PathBuf> {
        let valid = !fingerprint.is_empty()
            && fingerprint != "."
            && fingerprint != ".."
            && !fingerprint.contains(['/', '\\', ':']);
        if !valid {
            return Err(Error::Validation(format!(
                "invalid content fingerprint '{fingerprint}'"
            )));
        }
        Ok(self.root.join(fingerprint))
    }
}

fn chunk_name(index: u64) -> String {
    format!("{CHUNK_PREFIX}{index}")
}

fn parse_chunk_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(CHUNK_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
