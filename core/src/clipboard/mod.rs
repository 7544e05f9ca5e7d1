//! Clipboard content, entries, backends and the change monitor

mod engine;
mod history;

pub use engine::{LocalDecision, PendingState, RemoteDecision, SyncEngine};
pub use history::History;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arboard::Clipboard as Arboard;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ContentHash;
use crate::transfer::{build_manifest, display_name, total_size, FileManifestEntry};
use crate::{now_millis, Error, Result};

/// What can sit on a clipboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ClipboardContent {
    Text(String),
    Files(Vec<PathBuf>),
}

impl ClipboardContent {
    /// Value compared for loop suppression
    pub fn signature(&self) -> String {
        match self {
            ClipboardContent::Text(text) => text.clone(),
            ClipboardContent::Files(paths) => {
                files_signature(paths.iter().map(|p| display_name(p)))
            }
        }
    }

    pub fn hash(&self) -> ContentHash {
        ContentHash::of(self.signature().as_bytes())
    }
}

fn files_signature(names: impl Iterator<Item = String>) -> String {
    format!("FILES:{}", names.collect::<Vec<_>>().join(";"))
}

/// Local content ready to announce: file content carries its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContent {
    pub content: ClipboardContent,
    pub manifest: Vec<FileManifestEntry>,
}

impl PreparedContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ClipboardContent::Text(text.into()),
            manifest: Vec::new(),
        }
    }

    /// Hash and size any files so they can be announced
    pub async fn prepare(content: ClipboardContent) -> Result<Self> {
        let manifest = match &content {
            ClipboardContent::Text(_) => Vec::new(),
            ClipboardContent::Files(paths) => build_manifest(paths).await?,
        };
        Ok(Self { content, manifest })
    }

    pub fn signature(&self) -> String {
        self.content.signature()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    Local,
    Remote,
}

/// One synchronized clipboard value. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardEntry {
    pub id: Uuid,
    pub origin: EntryOrigin,
    pub sender_device_id: String,
    pub sender_hostname: String,
    /// Unix milliseconds
    pub timestamp: u64,
    pub text: Option<String>,
    pub files: Option<Vec<FileManifestEntry>>,
}

impl ClipboardEntry {
    /// A new entry authored on this device
    pub fn local(prepared: &PreparedContent, sender_device_id: &str, sender_hostname: &str) -> Self {
        let (text, files) = match &prepared.content {
            ClipboardContent::Text(text) => (Some(text.clone()), None),
            ClipboardContent::Files(_) => (None, Some(prepared.manifest.clone())),
        };

        Self {
            id: Uuid::new_v4(),
            origin: EntryOrigin::Local,
            sender_device_id: sender_device_id.to_string(),
            sender_hostname: sender_hostname.to_string(),
            timestamp: now_millis(),
            text,
            files,
        }
    }

    /// Same comparison value as [`ClipboardContent::signature`]
    pub fn signature(&self) -> String {
        match (&self.text, &self.files) {
            (_, Some(files)) => files_signature(files.iter().map(|f| f.name.clone())),
            (Some(text), None) => text.clone(),
            (None, None) => String::new(),
        }
    }

    pub fn manifest(&self) -> &[FileManifestEntry] {
        self.files.as_deref().unwrap_or(&[])
    }

    pub fn total_file_size(&self) -> u64 {
        total_size(self.manifest())
    }

    pub fn has_files(&self) -> bool {
        !self.manifest().is_empty()
    }

    /// Short single-line description for logs and hosts
    pub fn preview(&self) -> String {
        match (&self.text, &self.files) {
            (_, Some(files)) => format!("{} file(s), {} bytes", files.len(), self.total_file_size()),
            (Some(text), None) => {
                let line = text.lines().next().unwrap_or("");
                let mut preview: String = line.chars().take(60).collect();
                if line.chars().count() > 60 || text.trim_end().contains('\n') {
                    preview.push('…');
                }
                preview
            }
            (None, None) => String::new(),
        }
    }
}

/// Access to the OS clipboard (or a stand-in)
pub trait ClipboardBackend: Send + Sync {
    fn read(&self) -> Result<Option<ClipboardContent>>;
    fn write(&self, content: &ClipboardContent) -> Result<()>;

    /// What `read` returns after `write(content)`. Backends that cannot
    /// hold file lists store them as something else.
    fn stored_form(&self, content: &ClipboardContent) -> ClipboardContent {
        content.clone()
    }
}

/// The system clipboard via arboard. Text only; file lists are written as
/// newline-separated paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArboardClipboard;

impl ClipboardBackend for ArboardClipboard {
    fn read(&self) -> Result<Option<ClipboardContent>> {
        let mut clipboard = Arboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) if !text.is_empty() => Ok(Some(ClipboardContent::Text(text))),
            Ok(_) => Ok(None),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(Error::Clipboard(e.to_string())),
        }
    }

    fn write(&self, content: &ClipboardContent) -> Result<()> {
        let mut clipboard = Arboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;

        let ClipboardContent::Text(text) = self.stored_form(content) else {
            return Err(Error::Clipboard("arboard stores text only".to_string()));
        };
        clipboard.set_text(text).map_err(|e| Error::Clipboard(e.to_string()))
    }

    fn stored_form(&self, content: &ClipboardContent) -> ClipboardContent {
        match content {
            ClipboardContent::Text(_) => content.clone(),
            ClipboardContent::Files(paths) => ClipboardContent::Text(
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

/// In-process clipboard for headless hosts and tests
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    content: Arc<Mutex<Option<ClipboardContent>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<ClipboardContent> {
        self.content.lock().map(|c| c.clone()).unwrap_or(None)
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read(&self) -> Result<Option<ClipboardContent>> {
        self.content
            .lock()
            .map(|c| c.clone())
            .map_err(|_| Error::Clipboard("memory clipboard poisoned".to_string()))
    }

    fn write(&self, content: &ClipboardContent) -> Result<()> {
        let mut slot = self
            .content
            .lock()
            .map_err(|_| Error::Clipboard("memory clipboard poisoned".to_string()))?;
        *slot = Some(content.clone());
        Ok(())
    }
}

/// Detects changes by content hash
struct ChangeDetector {
    last_hash: Option<ContentHash>,
}

impl ChangeDetector {
    fn check(&mut self, content: Option<ClipboardContent>) -> Option<ClipboardContent> {
        match content {
            Some(content) => {
                let hash = content.hash();
                if self.last_hash == Some(hash) {
                    None
                } else {
                    self.last_hash = Some(hash);
                    Some(content)
                }
            }
            None => {
                self.last_hash = None;
                None
            }
        }
    }
}

/// Poll `backend` and report every change. `seed` is what was on the
/// clipboard at startup; it is not reported.
pub fn start_monitor(
    backend: Arc<dyn ClipboardBackend>,
    poll_interval: Duration,
    seed: Option<&ClipboardContent>,
) -> (mpsc::Receiver<ClipboardContent>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let last_hash = seed.map(ClipboardContent::hash);

    let handle = tokio::spawn(async move {
        let mut detector = ChangeDetector { last_hash };
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match backend.read() {
                Ok(content) => {
                    if let Some(change) = detector.check(content) {
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("clipboard read error: {}", e);
                }
            }
        }
    });

    (rx, handle)
}
