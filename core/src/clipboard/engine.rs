//! Clipboard synchronization state machine
//!
//! Pure bookkeeping: it decides, the service acts. Values are compared by
//! signature so a file entry and the files it produced count as equal.

use serde::Serialize;

use super::{ClipboardEntry, PreparedContent};

/// What to do with a local clipboard change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDecision {
    /// Send it to every trusted peer now
    Broadcast(PreparedContent),
    /// Hold it until the user asks to send
    Pending(PreparedContent),
    /// Already synchronized, or not new
    Ignored,
}

/// What to do with a remote entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDecision {
    /// Write it to the local clipboard
    Apply(ClipboardEntry),
    /// Hold it until the user confirms
    Pending(ClipboardEntry),
    /// Nothing to apply
    Ignored,
}

/// Pending candidates exposed to the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingState {
    pub send: Option<String>,
    pub receive: Option<ClipboardEntry>,
}

#[derive(Debug, Default)]
pub struct SyncEngine {
    local_clipboard: Option<String>,
    last_sent: Option<String>,
    last_received: Option<String>,
    pending_send: Option<PreparedContent>,
    pending_receive: Option<ClipboardEntry>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The local clipboard changed to `content`.
    pub fn on_local_change(&mut self, content: PreparedContent, auto_send: bool) -> LocalDecision {
        let signature = content.signature();
        if self.local_clipboard.as_deref() == Some(signature.as_str()) {
            return LocalDecision::Ignored;
        }
        self.local_clipboard = Some(signature.clone());

        if self.is_synchronized(&signature) {
            self.pending_send = None;
            return LocalDecision::Ignored;
        }

        if auto_send {
            self.pending_send = None;
            LocalDecision::Broadcast(content)
        } else {
            self.pending_send = Some(content.clone());
            LocalDecision::Pending(content)
        }
    }

    /// `signature` was broadcast
    pub fn mark_sent(&mut self, signature: &str) {
        self.last_sent = Some(signature.to_string());
        if self
            .pending_send
            .as_ref()
            .is_some_and(|p| p.signature() == signature)
        {
            self.pending_send = None;
        }
    }

    pub fn take_pending_send(&mut self) -> Option<PreparedContent> {
        self.pending_send.take()
    }

    /// A new (not yet seen) entry arrived from a trusted peer.
    pub fn on_remote_entry(&mut self, entry: ClipboardEntry, auto_receive: bool) -> RemoteDecision {
        let signature = entry.signature();

        if auto_receive {
            self.accept_received(&signature);
            return RemoteDecision::Apply(entry);
        }

        if self.local_clipboard.as_deref() == Some(signature.as_str()) {
            return RemoteDecision::Ignored;
        }
        self.pending_receive = Some(entry.clone());
        RemoteDecision::Pending(entry)
    }

    /// The user confirmed the pending remote entry
    pub fn confirm_pending_receive(&mut self) -> Option<ClipboardEntry> {
        let entry = self.pending_receive.take()?;
        self.accept_received(&entry.signature());
        Some(entry)
    }

    /// Something was written to the local clipboard on the user's behalf
    /// (history copy, host write). It is not newly authored content.
    pub fn note_local_write(&mut self, signature: &str) {
        self.local_clipboard = Some(signature.to_string());
        if self
            .pending_send
            .as_ref()
            .is_some_and(|p| p.signature() != signature)
        {
            self.pending_send = None;
        }
    }

    pub fn pending(&self) -> PendingState {
        let receive = self
            .pending_receive
            .as_ref()
            .filter(|e| Some(e.signature()) != self.local_clipboard)
            .cloned();

        PendingState {
            send: self.pending_send.as_ref().map(|p| p.signature()),
            receive,
        }
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    pub fn last_received(&self) -> Option<&str> {
        self.last_received.as_deref()
    }

    pub fn local_clipboard(&self) -> Option<&str> {
        self.local_clipboard.as_deref()
    }

    fn accept_received(&mut self, signature: &str) {
        self.last_received = Some(signature.to_string());
        self.local_clipboard = Some(signature.to_string());
        self.pending_receive = None;
        self.pending_send = None;
    }

    fn is_synchronized(&self, signature: &str) -> bool {
        self.last_sent.as_deref() == Some(signature) || self.last_received.as_deref() == Some(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(text: &str) -> ClipboardEntry {
        let mut entry = ClipboardEntry::local(&PreparedContent::text(text), "peer", "peer-host");
        entry.origin = super::super::EntryOrigin::Remote;
        entry
    }

    #[test]
    fn test_auto_send_broadcasts_new_content() {
        let mut engine = SyncEngine::new();
        let decision = engine.on_local_change(PreparedContent::text("hello"), true);
        assert_eq!(decision, LocalDecision::Broadcast(PreparedContent::text("hello")));

        engine.mark_sent("hello");
        assert_eq!(engine.last_sent(), Some("hello"));
    }

    #[test]
    fn test_sent_value_is_not_a_new_candidate() {
        let mut engine = SyncEngine::new();
        engine.on_local_change(PreparedContent::text("T"), true);
        engine.mark_sent("T");

        engine.on_local_change(PreparedContent::text("other"), false);
        let decision = engine.on_local_change(PreparedContent::text("T"), false);

        assert_eq!(decision, LocalDecision::Ignored);
        assert_eq!(engine.pending().send, None);
    }

    #[test]
    fn test_received_value_is_not_rebroadcast() {
        let mut engine = SyncEngine::new();
        let decision = engine.on_remote_entry(remote("from peer"), true);
        assert!(matches!(decision, RemoteDecision::Apply(_)));

        // the monitor then sees what we just wrote
        assert_eq!(
            engine.on_local_change(PreparedContent::text("from peer"), true),
            LocalDecision::Ignored
        );

        engine.on_local_change(PreparedContent::text("mine"), true);
        assert_eq!(
            engine.on_local_change(PreparedContent::text("from peer"), true),
            LocalDecision::Ignored
        );
    }

    #[test]
    fn test_manual_send_clears_candidate() {
        let mut engine = SyncEngine::new();
        let decision = engine.on_local_change(PreparedContent::text("hello"), false);
        assert_eq!(decision, LocalDecision::Pending(PreparedContent::text("hello")));
        assert_eq!(engine.pending().send.as_deref(), Some("hello"));

        let pending = engine.take_pending_send().unwrap();
        engine.mark_sent(&pending.signature());

        assert_eq!(engine.last_sent(), Some("hello"));
        assert_eq!(engine.pending().send, None);
        assert_eq!(engine.local_clipboard(), Some("hello"));
        assert_eq!(
            engine.on_local_change(PreparedContent::text("hello"), false),
            LocalDecision::Ignored
        );
    }

    #[test]
    fn test_pending_receive_and_confirm() {
        let mut engine = SyncEngine::new();
        let entry = remote("incoming");

        let decision = engine.on_remote_entry(entry.clone(), false);
        assert_eq!(decision, RemoteDecision::Pending(entry.clone()));
        assert_eq!(engine.pending().receive, Some(entry.clone()));

        assert_eq!(engine.confirm_pending_receive(), Some(entry));
        assert_eq!(engine.last_received(), Some("incoming"));
        assert_eq!(engine.pending(), PendingState::default());
        assert_eq!(engine.confirm_pending_receive(), None);
    }

    #[test]
    fn test_pending_receive_equal_to_local_is_not_actionable() {
        let mut engine = SyncEngine::new();
        engine.on_local_change(PreparedContent::text("same"), false);

        assert_eq!(engine.on_remote_entry(remote("same"), false), RemoteDecision::Ignored);

        engine.on_remote_entry(remote("different"), false);
        engine.note_local_write("different");
        assert_eq!(engine.pending().receive, None);
    }

    #[test]
    fn test_note_local_write_does_not_touch_bookkeeping() {
        let mut engine = SyncEngine::new();
        engine.on_local_change(PreparedContent::text("a"), true);
        engine.mark_sent("a");

        engine.note_local_write("old history item");

        assert_eq!(engine.last_sent(), Some("a"));
        assert_eq!(engine.last_received(), None);
        assert_eq!(
            engine.on_local_change(PreparedContent::text("old history item"), true),
            LocalDecision::Ignored
        );
    }
}
