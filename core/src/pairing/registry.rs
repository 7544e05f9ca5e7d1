//! In-flight pairing sessions, at most one per target peer

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    /// Request sent, waiting for the member's PAKE message
    Initiated,
    /// Confirmation sent, waiting for the cluster secret
    AwaitingVerification,
}

#[derive(Debug)]
struct PairingSession {
    token: u64,
    state: PairingState,
    created_at: Instant,
    task: Option<AbortHandle>,
}

#[derive(Debug, Default)]
pub struct PairingRegistry {
    sessions: HashMap<String, PairingSession>,
    next_token: u64,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `peer_id`, cancelling any previous one. Returns the
    /// new token and whether an older session was superseded.
    pub fn begin(&mut self, peer_id: &str) -> (u64, bool) {
        self.next_token += 1;
        let token = self.next_token;

        let previous = self.sessions.insert(
            peer_id.to_string(),
            PairingSession {
                token,
                state: PairingState::Initiated,
                created_at: Instant::now(),
                task: None,
            },
        );

        let superseded = match previous {
            Some(old) => {
                if let Some(task) = old.task {
                    task.abort();
                }
                tracing::info!(
                    "pairing with {} superseded after {:?}",
                    peer_id,
                    old.created_at.elapsed()
                );
                true
            }
            None => false,
        };

        (token, superseded)
    }

    /// Bind the running task to its session. If the session was replaced in
    /// the meantime the task is aborted and `false` returned.
    pub fn attach(&mut self, peer_id: &str, token: u64, task: AbortHandle) -> bool {
        match self.sessions.get_mut(peer_id) {
            Some(session) if session.token == token => {
                session.task = Some(task);
                true
            }
            _ => {
                task.abort();
                false
            }
        }
    }

    pub fn advance(&mut self, peer_id: &str, token: u64, state: PairingState) {
        if let Some(session) = self.sessions.get_mut(peer_id) {
            if session.token == token {
                session.state = state;
            }
        }
    }

    pub fn is_current(&self, peer_id: &str, token: u64) -> bool {
        self.sessions
            .get(peer_id)
            .map(|s| s.token == token)
            .unwrap_or(false)
    }

    /// Close the session if `token` is still the current one
    pub fn finish(&mut self, peer_id: &str, token: u64) -> bool {
        if self.is_current(peer_id, token) {
            self.sessions.remove(peer_id);
            true
        } else {
            false
        }
    }

    pub fn state(&self, peer_id: &str) -> Option<PairingState> {
        self.sessions.get(peer_id).map(|s| s.state)
    }

    pub fn cancel_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            if let Some(task) = session.task {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> tokio::task::JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_second_session_supersedes_first() {
        let mut registry = PairingRegistry::new();

        let (first, superseded) = registry.begin("peer");
        assert!(!superseded);
        let task = sleeper();
        assert!(registry.attach("peer", first, task.abort_handle()));

        let (second, superseded) = registry.begin("peer");
        assert!(superseded);
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(!registry.finish("peer", first));
        assert!(registry.is_current("peer", second));
        assert!(registry.finish("peer", second));
        assert_eq!(registry.state("peer"), None);
    }

    #[tokio::test]
    async fn test_late_attach_is_aborted() {
        let mut registry = PairingRegistry::new();
        let (stale, _) = registry.begin("peer");
        registry.begin("peer");

        let task = sleeper();
        assert!(!registry.attach("peer", stale, task.abort_handle()));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_sessions_are_per_peer() {
        let mut registry = PairingRegistry::new();
        let (a, _) = registry.begin("a");
        let (b, superseded) = registry.begin("b");

        assert!(!superseded);
        registry.advance("a", a, PairingState::AwaitingVerification);
        assert_eq!(registry.state("a"), Some(PairingState::AwaitingVerification));
        assert_eq!(registry.state("b"), Some(PairingState::Initiated));
        assert!(registry.is_current("b", b));

        registry.cancel_all();
        assert_eq!(registry.state("a"), None);
    }
}
