//! File manifests announced with clipboard entries

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::protocol::constants::FILE_CHUNK_SIZE;
use crate::protocol::ContentHash;
use crate::{Error, Result};

/// One announced file: metadata only, the bytes are fetched on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestEntry {
    pub name: String,
    pub size: u64,
    pub sha256: ContentHash,
}

/// Describe local files for announcement
pub async fn build_manifest(paths: &[PathBuf]) -> Result<Vec<FileManifestEntry>> {
    if paths.is_empty() {
        return Err(Error::InvalidState("no files given".to_string()));
    }

    let mut manifest = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::InvalidState(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        manifest.push(FileManifestEntry {
            name: display_name(path),
            size: metadata.len(),
            sha256: hash_file(path).await?,
        });
    }
    Ok(manifest)
}

/// SHA256 of a file, streamed
pub async fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_CHUNK_SIZE as usize];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(ContentHash::from_hasher(hasher))
}

/// Final path component as a string
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

/// Reduce a name received from a peer to a safe single path component
pub fn sanitize_name(name: &str) -> String {
    let last = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();

    match last {
        "" | "." | ".." => "file".to_string(),
        other => other.chars().filter(|c| !c.is_control()).collect(),
    }
}

pub fn total_size(manifest: &[FileManifestEntry]) -> u64 {
    manifest.iter().map(|f| f.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manifest_describes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, vec![7u8; 1000]).unwrap();

        let manifest = build_manifest(&[a, b]).await.unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].name, "a.txt");
        assert_eq!(manifest[0].size, 5);
        assert_eq!(manifest[0].sha256, ContentHash::of(b"hello"));
        assert_eq!(total_size(&manifest), 1005);
    }

    #[tokio::test]
    async fn test_manifest_rejects_directories_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_manifest(&[dir.path().to_path_buf()]).await.is_err());
        assert!(build_manifest(&[dir.path().join("missing")]).await.is_err());
        assert!(build_manifest(&[]).await.is_err());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_name("C:\\Users\\x\\doc.txt"), "doc.txt");
        assert_eq!(sanitize_name(".."), "file");
        assert_eq!(sanitize_name("dir/"), "file");
    }
}
