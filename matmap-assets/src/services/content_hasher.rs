//! Content identity
//!
//! SHA-256 digests of file bytes, used to decide whether a canonical file
//! already holds the content of its inbox source.

use crate::error::{AssetError, AssetResult};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Hash a file synchronously (1 MiB chunks)
pub fn hash_file_blocking(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculate the lowercase hex SHA-256 of a file on the blocking pool
pub async fn hash_file(path: &Path) -> AssetResult<String> {
    let path_buf = path.to_path_buf();
    tracing::debug!(path = %path_buf.display(), "Calculating SHA-256 hash");

    let hash = tokio::task::spawn_blocking(move || hash_file_blocking(&path_buf))
        .await
        .map_err(|e| {
            AssetError::Common(matmap_common::Error::Internal(format!(
                "Hash calculation task failed: {}",
                e
            )))
        })??;

    Ok(hash)
}

/// True when both files hold the same bytes
///
/// Byte lengths are compared first, so differently sized files are never hashed.
pub async fn files_identical(a: &Path, b: &Path) -> AssetResult<bool> {
    let len_a = tokio::fs::metadata(a).await?.len();
    let len_b = tokio::fs::metadata(b).await?.len();
    if len_a != len_b {
        return Ok(false);
    }
    Ok(hash_file(a).await? == hash_file(b).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();

        let hash = hash_file(&path).await.unwrap();
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_multi_chunk_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let expected = format!("{:x}", Sha256::digest(&data));
        assert_eq!(hash_file(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_files_identical() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let d = dir.path().join("d");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        std::fs::write(&c, b"different!").unwrap();
        std::fs::write(&d, b"short").unwrap();

        assert!(files_identical(&a, &b).await.unwrap());
        assert!(!files_identical(&a, &c).await.unwrap());
        assert!(!files_identical(&a, &d).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, AssetError::Io(_)));
    }
}
