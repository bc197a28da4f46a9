use std::fs;
use std::path::{Path, PathBuf};

use crate::assembler::Assembler;
use crate::chunks::ChunkStore;
use crate::config::Config;
use crate::error::Result;
use crate::metadata::MetadataRegistry;
use crate::sessions::SessionRegistry;

/// Owns every piece of shared state. Handlers get it by reference; locking is
/// internal to each component.
pub struct Engine {
    pub(crate) upload_dir: PathBuf,
    pub(crate) chunks: ChunkStore,
    pub(crate) sessions: SessionRegistry,
    pub(crate) assembler: Assembler,
    pub(crate) registry: MetadataRegistry,
}

impl Engine {
    /// Prepares the storage directories, loads the metadata registry and
    /// removes chunks left behind by sessions that never completed.
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.upload_dir)?;
        fs::create_dir_all(&config.temp_dir)?;
        let upload_dir = fs::canonicalize(&config.upload_dir)?;

        let registry = MetadataRegistry::open(&config.metadata_file, &upload_dir)?;
        let chunks = ChunkStore::new(&config.temp_dir);
        let purged = chunks.purge_all()?;
        if purged > 0 {
            tracing::info!("removed {purged} abandoned chunk directories");
        }

        Ok(Self {
            upload_dir,
            chunks,
            sessions: SessionRegistry::new(),
            assembler: Assembler::new(),
            registry,
        })
    }

    /// Canonical storage root.
    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    #[must_use]
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_purges_leftover_chunks() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        ChunkStore::new(&config.temp_dir)
            .save_chunk("leftover", 0, b"x")
            .unwrap();

        // Act
        let engine = Engine::open(&config).unwrap();

        // Assert
        assert!(engine.chunks().list_chunks("leftover").unwrap().is_empty());
        assert!(config.upload_dir.is_dir());
        assert!(config.metadata_file.is_file());
    }

    #[test]
    fn open_fails_on_corrupt_metadata() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        fs::write(&config.metadata_file, b"[").unwrap();

        // Act
        let result = Engine::open(&config);

        // Assert
        assert!(matches!(
            result,
            Err(crate::error::Error::CorruptMetadata { .. })
        ));
    }
}
