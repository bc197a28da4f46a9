use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Block size the file is read in while hashing.
pub const HASH_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// Hex encoded blake3 hash of the whole file.
///
/// The file is read one block at a time so memory use does not depend on the
/// file size.
pub async fn fingerprint_file(path: &Path, block_size: usize) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut block = vec![0u8; block_size.max(1)];
    loop {
        let read = file.read(&mut block).await?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(HASH_BLOCK_SIZE)]
    #[tokio::test]
    async fn block_size_does_not_change_fingerprint(#[case] block_size: usize) {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let content: Vec<u8> = (0..100u8).collect();
        std::fs::write(&path, &content).unwrap();

        // Act
        let fingerprint = fingerprint_file(&path, block_size).await.unwrap();

        // Assert
        assert_eq!(fingerprint, blake3::hash(&content).to_hex().to_string());
    }

    #[tokio::test]
    async fn empty_file_has_fingerprint() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        // Act
        let fingerprint = fingerprint_file(&path, HASH_BLOCK_SIZE).await.unwrap();

        // Assert
        assert_eq!(fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn missing_file_fails() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();

        // Act
        let result = fingerprint_file(&dir.path().join("nope"), HASH_BLOCK_SIZE).await;

        // Assert
        assert!(result.is_err());
    }
}
