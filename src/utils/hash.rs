use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use log::warn;
use sha2::{Digest, Sha256};

use crate::utils::manifest::SourceFile;

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// SHA-256 of a file as lowercase hex.
///
/// Returns `None` for anything that is not a regular file or is larger than
/// `max_size_mb`.
pub fn calculate_sha256(path: &Path, max_size_mb: u64) -> io::Result<Option<String>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() || metadata.len() > max_size_mb.saturating_mul(1024 * 1024) {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// Manifest record for a source file. Read errors are logged, not raised.
pub fn describe_source(path: &Path, hash: bool, max_size_mb: u64) -> SourceFile {
    let size = fs::metadata(path).map(|m| m.len()).ok();
    let sha256 = if hash {
        match calculate_sha256(path, max_size_mb) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to hash {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    SourceFile {
        path: path.display().to_string(),
        size,
        sha256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            calculate_sha256(&path, 1).unwrap().as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_size_limit_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        fs::write(&path, vec![0u8; 1024 * 1024 + 1]).unwrap();

        assert_eq!(calculate_sha256(&path, 1).unwrap(), None);
        assert_eq!(calculate_sha256(temp_dir.path(), 1).unwrap(), None);
    }

    #[test]
    fn test_describe_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();

        let hashed = describe_source(&path, true, 1);
        assert_eq!(hashed.size, Some(3));
        assert!(hashed.sha256.is_some());

        assert_eq!(describe_source(&path, false, 1).sha256, None);

        let missing = describe_source(&temp_dir.path().join("gone"), true, 1);
        assert_eq!(missing.size, None);
        assert_eq!(missing.sha256, None);
    }
}
