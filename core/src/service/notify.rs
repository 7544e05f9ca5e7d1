//! Notifications pushed from the core to its host

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clipboard::ClipboardEntry;
use crate::error::PairingFailure;
use crate::peers::Peer;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    PeerUpdate {
        peer: Peer,
    },
    PeerRemove {
        peer_id: String,
    },
    /// An entry was added to the history, sent or received
    ClipboardChange {
        entry: ClipboardEntry,
    },
    /// A remote entry waits for confirmation (auto-receive off)
    ClipboardPending {
        entry: ClipboardEntry,
    },
    /// The pending local candidate changed (auto-send off)
    ClipboardMonitorUpdate {
        pending: Option<String>,
    },
    HistoryDelete {
        entry_id: Uuid,
    },
    FileProgress {
        entry_id: Uuid,
        file_index: usize,
        transferred: u64,
        total: u64,
    },
    FileReceived {
        entry_id: Uuid,
        file_index: usize,
        path: PathBuf,
    },
    FileFailed {
        entry_id: Uuid,
        file_index: usize,
        reason: String,
    },
    /// Files too large to fetch automatically; use `request_file`
    FilesAvailable {
        entry_id: Uuid,
        peer_id: String,
        total_size: u64,
    },
    NetworkUpdate {
        network_name: String,
    },
    /// This device was reset, locally or by a destruct command
    NetworkReset,
    PairingFailed {
        peer_id: String,
        reason: PairingFailure,
    },
    SettingsChanged {
        settings: Settings,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::PeerUpdate { .. } => "peer-update",
            Notification::PeerRemove { .. } => "peer-remove",
            Notification::ClipboardChange { .. } => "clipboard-change",
            Notification::ClipboardPending { .. } => "clipboard-pending",
            Notification::ClipboardMonitorUpdate { .. } => "clipboard-monitor-update",
            Notification::HistoryDelete { .. } => "history-delete",
            Notification::FileProgress { .. } => "file-progress",
            Notification::FileReceived { .. } => "file-received",
            Notification::FileFailed { .. } => "file-failed",
            Notification::FilesAvailable { .. } => "files-available",
            Notification::NetworkUpdate { .. } => "network-update",
            Notification::NetworkReset => "network-reset",
            Notification::PairingFailed { .. } => "pairing-failed",
            Notification::SettingsChanged { .. } => "settings-changed",
        }
    }
}

/// Sending half of the notification queue. Never blocks: when the host
/// falls behind, notifications are dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!("notification queue full, dropping {}", n.name());
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::trace!("no host listening for {}", n.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::channel(1);

        notifier.notify(Notification::NetworkReset);
        notifier.notify(Notification::PeerRemove {
            peer_id: "dropped".into(),
        });

        assert_eq!(rx.recv().await, Some(Notification::NetworkReset));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_serialized_event_tag() {
        let json = serde_json::to_value(Notification::PairingFailed {
            peer_id: "p".into(),
            reason: PairingFailure::WrongPin,
        })
        .unwrap();

        assert_eq!(json["event"], "pairing-failed");
        assert_eq!(json["peer_id"], "p");
        assert_eq!(json["reason"]["kind"], "wrong_pin");
        assert_eq!(
            serde_json::to_value(Notification::NetworkReset).unwrap()["event"],
            "network-reset"
        );
    }
}
