//! Receiving side of a file transfer

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::crypto::ClusterKey;
use crate::protocol::constants::FILE_CHUNK_SIZE;
use crate::protocol::{ContentHash, FileChunkBody, FileRequestBody, Message};
use crate::sync::PeerConnection;
use crate::transfer::manifest::{sanitize_name, FileManifestEntry};
use crate::{Error, Result};

/// Everything needed to fetch one file
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub entry_id: Uuid,
    pub file_index: usize,
    pub peer_id: String,
    pub addr: SocketAddr,
    pub key: ClusterKey,
    pub my_id: String,
    pub file: FileManifestEntry,
    pub dest_dir: PathBuf,
    pub chunk_timeout: Duration,
}

/// A `.part` file that is deleted unless committed
struct PartialFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

impl PartialFile {
    async fn create(path: PathBuf) -> Result<Self> {
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => Ok(file.write_all(data).await?),
            None => Err(Error::InvalidState("partial file already closed".to_string())),
        }
    }

    async fn commit(mut self, dest: &Path) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.path, dest).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Final path of one manifest file. Each file gets its own directory so
/// equal names from different source folders never share a path.
pub fn destination(dest_dir: &Path, entry_id: Uuid, file_index: usize, name: &str) -> PathBuf {
    dest_dir
        .join(entry_id.to_string())
        .join(file_index.to_string())
        .join(sanitize_name(name))
}

/// Fetch one file chunk by chunk, verifying size and hash before it
/// appears under its final name. `progress` gets `(transferred, total)`.
pub async fn download(plan: &DownloadPlan, mut progress: impl FnMut(u64, u64)) -> Result<PathBuf> {
    let name = sanitize_name(&plan.file.name);
    let final_path = destination(&plan.dest_dir, plan.entry_id, plan.file_index, &plan.file.name);
    let dir = final_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| plan.dest_dir.clone());
    tokio::fs::create_dir_all(&dir).await?;

    let mut partial = PartialFile::create(dir.join(format!("{}.part", name))).await?;

    let mut conn = PeerConnection::connect(plan.addr, plan.chunk_timeout).await?;
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    loop {
        let body = FileRequestBody {
            entry_id: plan.entry_id,
            file_index: plan.file_index,
            offset,
            max_len: FILE_CHUNK_SIZE,
        };
        let request = Message::FileRequest {
            sender_id: plan.my_id.clone(),
            sealed: plan.key.seal_json(&body)?,
        };

        let chunk: FileChunkBody = match conn.request(&request, plan.chunk_timeout).await? {
            Message::FileChunk { sealed } => plan.key.open_json(&sealed)?,
            Message::Error { reason } => {
                return Err(Error::Network(format!("{} refused: {}", plan.peer_id, reason)))
            }
            other => {
                return Err(Error::InvalidMessage(format!(
                    "expected file chunk, got {}",
                    other.kind()
                )))
            }
        };

        if chunk.offset != offset {
            return Err(Error::Integrity(format!(
                "chunk at offset {} but expected {}",
                chunk.offset, offset
            )));
        }
        let len = chunk.data.len() as u64;
        if offset + len > plan.file.size {
            return Err(Error::Integrity(format!(
                "{} is larger than the announced {} bytes",
                name, plan.file.size
            )));
        }

        partial.write(&chunk.data).await?;
        hasher.update(&chunk.data);
        offset += len;
        progress(offset, plan.file.size);

        if chunk.eof {
            break;
        }
        if len == 0 {
            return Err(Error::Integrity("empty chunk before end of file".to_string()));
        }
    }

    if offset != plan.file.size {
        return Err(Error::Integrity(format!(
            "{}: received {} of {} bytes",
            name, offset, plan.file.size
        )));
    }
    if ContentHash::from_hasher(hasher) != plan.file.sha256 {
        return Err(Error::Integrity(format!("{}: content hash mismatch", name)));
    }

    partial.commit(&final_path).await?;
    tracing::info!("received {} ({} bytes)", final_path.display(), offset);
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_files_get_distinct_paths() {
        let root = Path::new("/downloads");
        let id = Uuid::new_v4();

        let first = destination(root, id, 0, "a/notes.txt");
        let second = destination(root, id, 1, "b/notes.txt");

        assert_ne!(first, second);
        assert_eq!(first.file_name(), second.file_name());
        assert_eq!(first.file_name().unwrap(), "notes.txt");
        assert!(first.starts_with(root.join(id.to_string())));
    }

    #[tokio::test]
    async fn test_partial_file_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("x.part");

        {
            let mut partial = PartialFile::create(part.clone()).await.unwrap();
            partial.write(b"half").await.unwrap();
            assert!(part.exists());
        }
        assert!(!part.exists());

        let dest = dir.path().join("x");
        let mut partial = PartialFile::create(part.clone()).await.unwrap();
        partial.write(b"whole").await.unwrap();
        partial.commit(&dest).await.unwrap();

        assert!(!part.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"whole");
    }
}
