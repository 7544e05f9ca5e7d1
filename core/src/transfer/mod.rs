//! File transfer
//!
//! Clipboard entries only announce files. The bytes move on request, one
//! connection per file, in sealed chunks of at most [`FILE_CHUNK_SIZE`].

mod download;
mod manifest;
mod registry;

pub use download::{download, DownloadPlan};
pub use manifest::{
    build_manifest, display_name, hash_file, sanitize_name, total_size, FileManifestEntry,
};
pub use registry::{Downloads, OfferedFiles};

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::crypto::ClusterKey;
use crate::protocol::constants::FILE_CHUNK_SIZE;
use crate::protocol::{FileChunkBody, FileRequestBody, Message};
use crate::sync::PeerConnection;
use crate::{Error, Result};

/// Answer chunk requests for `path` on `conn` until the whole file is sent.
/// `first` has already been authorized by the caller; follow-up requests on
/// the same connection must come from the same requester for the same file.
pub async fn serve_file(
    conn: &mut PeerConnection,
    key: &ClusterKey,
    path: &Path,
    requester_id: &str,
    first: FileRequestBody,
    chunk_timeout: Duration,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let total_size = file.metadata().await?.len();
    let mut request = first;

    loop {
        let want = request.max_len.clamp(1, FILE_CHUNK_SIZE);
        let offset = request.offset.min(total_size);

        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = Vec::with_capacity(want as usize);
        (&mut file).take(want).read_to_end(&mut data).await?;

        let eof = offset + data.len() as u64 >= total_size;
        let chunk = FileChunkBody {
            offset,
            total_size,
            data,
            eof,
        };
        conn.send(&Message::FileChunk {
            sealed: key.seal_json(&chunk)?,
        })
        .await?;

        if eof {
            tracing::debug!("sent {} to {}", path.display(), requester_id);
            return Ok(());
        }

        request = match conn.recv_timeout(chunk_timeout).await? {
            Message::FileRequest { sender_id, sealed } if sender_id == requester_id => {
                let next: FileRequestBody = key.open_json(&sealed)?;
                if next.entry_id != request.entry_id || next.file_index != request.file_index {
                    return Err(Error::InvalidMessage(
                        "file changed mid-transfer".to_string(),
                    ));
                }
                next
            }
            other => {
                return Err(Error::InvalidMessage(format!(
                    "unexpected {} during file transfer",
                    other.kind()
                )))
            }
        };
    }
}
