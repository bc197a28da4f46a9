use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::chunks::ChunkStore;
use crate::error::{Error, Result};

/// Prefix of files a merge is still writing. Listings skip them.
pub const PARTIAL_PREFIX: &str = ".filehub-part-";

/// Merges stored chunks into their final file.
///
/// At most one merge per fingerprint runs at a time; different fingerprints
/// merge in parallel.
#[derive(Default)]
pub struct Assembler {
    in_flight: Mutex<HashSet<String>>,
}

struct MergeGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    fingerprint: String,
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.fingerprint);
    }
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes chunks `0..total_chunks` of `fingerprint` to `target` in index
    /// order and returns the number of bytes written.
    ///
    /// Fails with [`Error::MissingChunk`] at the first absent index. The target
    /// only appears once every byte is written and its length equals
    /// `expected_len`; a failed merge leaves any previous file untouched.
    pub fn merge(
        &self,
        chunks: &ChunkStore,
        fingerprint: &str,
        total_chunks: u64,
        expected_len: u64,
        target: &Path,
    ) -> Result<u64> {
        let _guard = self.acquire(fingerprint)?;

        let parent = target
            .parent()
            .ok_or_else(|| Error::Validation(format!("invalid target {}", target.display())))?;
        fs::create_dir_all(parent)?;

        let mut partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)?;
        let mut written = 0u64;
        {
            let mut writer = BufWriter::new(partial.as_file_mut());
            for index in 0..total_chunks {
                let path = chunks.chunk_path(fingerprint, index)?;
                let mut chunk = match File::open(&path) {
                    Ok(f) => f,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        tracing::error!("merge of {fingerprint} stopped, chunk {index} is missing");
                        return Err(Error::MissingChunk(index));
                    }
                    Err(e) => return Err(e.into()),
                };
                written += io::copy(&mut chunk, &mut writer)?;
            }
            writer.flush()?;
        }

        if written != expected_len {
            return Err(Error::Validation(format!(
                "assembled {written} bytes but {expected_len} were announced"
            )));
        }

        partial.as_file().sync_all()?;
        partial.persist(target).map_err(|e| e.error)?;
        tracing::info!(
            "merged {total_chunks} chunks ({written} bytes) into {}",
            target.display()
        );
        Ok(written)
    }

    fn acquire(&self, fingerprint: &str) -> Result<MergeGuard<'_>> {
        if !self.in_flight.lock().insert(fingerprint.to_owned()) {
            return Err(Error::MergeInProgress(fingerprint.to_owned()));
        }
        Ok(MergeGuard {
            in_flight: &self.in_flight,
            fingerprint: fingerprint.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[rstest]
    #[case(25, 10, vec![2, 0, 1])]
    #[case(20, 10, vec![1, 0])]
    #[case(7, 10, vec![0])]
    #[case(100, 9, vec![11, 3, 7, 0, 5, 1, 9, 2, 10, 4, 6, 8])]
    #[trace]
    fn merge_any_upload_order_is_byte_exact(
        #[case] len: usize,
        #[case] chunk_size: usize,
        #[case] order: Vec<u64>,
    ) {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("temp"));
        let data = content(len);
        for index in &order {
            let start = *index as usize * chunk_size;
            let end = (start + chunk_size).min(len);
            store.save_chunk("fp", *index, &data[start..end]).unwrap();
        }
        let target = dir.path().join("out").join("nested").join("file.bin");
        let assembler = Assembler::new();

        // Act
        let written = assembler
            .merge(&store, "fp", order.len() as u64, len as u64, &target)
            .unwrap();

        // Assert
        assert_eq!(written, len as u64);
        assert_eq!(fs::read(&target).unwrap(), data);
    }

    #[test]
    fn merge_stops_at_first_gap() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("temp"));
        store.save_chunk("fp", 0, &[0; 10]).unwrap();
        store.save_chunk("fp", 2, &[2; 5]).unwrap();
        let target = dir.path().join("file.bin");
        let assembler = Assembler::new();

        // Act
        let result = assembler.merge(&store, "fp", 3, 25, &target);

        // Assert
        assert!(matches!(result, Err(Error::MissingChunk(1))));
        assert!(!target.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_merge_keeps_previous_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("temp"));
        store.save_chunk("fp", 0, b"new").unwrap();
        let target = dir.path().join("file.bin");
        fs::write(&target, b"old content").unwrap();
        let assembler = Assembler::new();

        // Act
        let result = assembler.merge(&store, "fp", 2, 6, &target);

        // Assert
        assert!(result.is_err());
        assert_eq!(fs::read(&target).unwrap(), b"old content");
    }

    #[test]
    fn merge_rejects_length_mismatch() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("temp"));
        store.save_chunk("fp", 0, b"abc").unwrap();
        let target = dir.path().join("file.bin");
        let assembler = Assembler::new();

        // Act
        let result = assembler.merge(&store, "fp", 1, 10, &target);

        // Assert
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!target.exists());
    }

    #[test]
    fn merge_of_same_fingerprint_is_exclusive() {
        // Arrange
        let assembler = Assembler::new();
        let guard = assembler.acquire("fp").unwrap();

        // Act
        let same = assembler.acquire("fp");
        let other = assembler.acquire("other");

        // Assert
        assert!(matches!(same, Err(Error::MergeInProgress(_))));
        assert!(other.is_ok());
        drop(guard);
        assert!(assembler.acquire("fp").is_ok());
    }

    #[test]
    fn merge_zero_chunks_creates_empty_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("temp"));
        let target = dir.path().join("empty.bin");
        let assembler = Assembler::new();

        // Act
        let written = assembler.merge(&store, "fp", 0, 0, &target).unwrap();

        // Assert
        assert_eq!(written, 0);
        assert!(fs::read(&target).unwrap().is_empty());
    }
}
