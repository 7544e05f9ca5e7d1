//! Clusterclip Core - serverless peer-to-peer clipboard cluster
//!
//! Devices on a LAN find each other over mDNS (or by address), join a
//! cluster by proving knowledge of its PIN through a PAKE exchange, and then
//! share clipboard text and files encrypted under the shared cluster key.
//!
//! Hosts start a [`ClusterService`], drive it through the returned
//! [`ServiceHandle`] and consume [`Notification`]s.

pub mod clipboard;
pub mod crypto;
pub mod discovery;
pub mod identity;
pub mod pairing;
pub mod peers;
pub mod protocol;
pub mod service;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod transfer;
pub mod trust;

mod error;

pub use error::{Error, PairingFailure, Result};

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use protocol::constants::{
    CLIPBOARD_POLL_INTERVAL_MS, DEFAULT_PORT, HEARTBEAT_INTERVAL, PAIRING_TIMEOUT, REQUEST_TIMEOUT,
};

/// Seconds since the Unix epoch
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Configuration for the cluster service
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on; the next free one is used if taken. 0 picks any.
    pub port: u16,
    /// Path to store persistent data (identity, known peers, settings)
    pub data_dir: PathBuf,
    /// Where received files are written
    pub download_dir: PathBuf,
    /// Overrides the OS hostname; the settings' custom name wins over both
    pub device_name: Option<String>,
    pub enable_discovery: bool,
    /// Poll the clipboard backend and feed changes to the sync engine
    pub monitor_clipboard: bool,
    pub clipboard_poll_interval: Duration,
    pub request_timeout: Duration,
    pub pairing_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Defaults with all state kept under `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            download_dir: data_dir.join("downloads"),
            data_dir,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_home().join(".clusterclip");
        let download_dir = dirs::download_dir()
            .map(|d| d.join("clusterclip"))
            .unwrap_or_else(|| data_dir.join("downloads"));

        Self {
            port: DEFAULT_PORT,
            data_dir,
            download_dir,
            device_name: None,
            enable_discovery: true,
            monitor_clipboard: true,
            clipboard_poll_interval: Duration::from_millis(CLIPBOARD_POLL_INTERVAL_MS),
            request_timeout: REQUEST_TIMEOUT,
            pairing_timeout: PAIRING_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// Re-export key types for convenience
pub use clipboard::{
    ArboardClipboard, ClipboardBackend, ClipboardContent, ClipboardEntry, MemoryClipboard,
    PendingState,
};
pub use identity::ClusterMode;
pub use peers::Peer;
pub use protocol::JoinInvite;
pub use service::{ClusterService, NetworkStatus, Notification, ServiceHandle};
pub use settings::{NotificationSettings, Settings};
