//! Trust store: who is in "my cluster"
//!
//! Wraps the peer table and persists the peers that must survive a restart
//! (trusted and manual ones) to `known_peers.json`. Every trust mutation
//! goes through here so the file never lags behind memory.
//!
//! Kicked peers still hold the cluster key, so their ids are kept in
//! `revoked_peers.json` until they pair again or the key changes.

mod revocation;

pub use revocation::{destruct_command, verify_destruct};

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::peers::{Peer, PeerObservation, PeerTable, PruneOutcome};
use crate::storage::{read_json, remove_file, write_json};
use crate::Result;

const REVOKED_PEERS_FILE: &str = "revoked_peers.json";

#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    revoked_path: PathBuf,
    peers: PeerTable,
    revoked: BTreeSet<String>,
}

impl TrustStore {
    /// Load known peers. They start offline until seen again.
    pub fn open(path: &Path) -> Self {
        let known: Vec<Peer> = match read_json(path) {
            Ok(Some(peers)) => peers,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("known peers unreadable, starting empty: {}", e);
                Vec::new()
            }
        };

        let peers = PeerTable::from_peers(known.into_iter().map(|mut p| {
            p.online = false;
            p
        }));

        let revoked_path = path.with_file_name(REVOKED_PEERS_FILE);
        let revoked = match read_json(&revoked_path) {
            Ok(Some(ids)) => ids,
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!("revoked peers unreadable, starting empty: {}", e);
                BTreeSet::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            revoked_path,
            peers,
            revoked,
        }
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn is_trusted(&self, id: &str) -> bool {
        self.peers.get(id).map(|p| p.is_trusted).unwrap_or(false)
    }

    pub fn is_trusted_at(&self, id: &str, ip: IpAddr) -> bool {
        self.peers.is_trusted_at(id, ip)
    }

    /// Kicked while it held the current key
    pub fn is_revoked(&self, id: &str) -> bool {
        self.revoked.contains(id)
    }

    pub fn trusted(&self) -> Vec<Peer> {
        self.peers.trusted().cloned().collect()
    }

    /// Record or refresh a sighting. Persists when a manual peer is new.
    pub fn observe(&mut self, obs: PeerObservation, now: u64) -> Result<(Peer, bool)> {
        let manual = obs.manual;
        let (peer, is_new) = self.peers.observe(obs, now);
        if manual && is_new {
            self.persist()?;
        }
        Ok((peer, is_new))
    }

    /// Mark `peer` trusted, inserting it if unknown. Lifts a revocation.
    pub fn add_trusted(&mut self, mut peer: Peer) -> Result<Peer> {
        if self.revoked.remove(&peer.id) {
            self.persist_revoked()?;
        }
        if let Some(existing) = self.peers.get(&peer.id) {
            peer.is_manual |= existing.is_manual;
            peer.last_seen = peer.last_seen.max(existing.last_seen);
            peer.online |= existing.online;
        }
        peer.is_trusted = true;
        self.peers.upsert(peer.clone());
        self.persist()?;
        Ok(peer)
    }

    /// Forget a peer entirely
    pub fn remove_trusted(&mut self, id: &str) -> Result<Option<Peer>> {
        let removed = self.peers.remove(id);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Forget a peer and refuse its presence proofs until it pairs again
    pub fn revoke(&mut self, id: &str) -> Result<Option<Peer>> {
        let removed = self.remove_trusted(id)?;
        if self.revoked.insert(id.to_string()) {
            self.persist_revoked()?;
        }
        Ok(removed)
    }

    pub fn mark_offline(&mut self, id: &str) -> Option<Peer> {
        self.peers.mark_offline(id).cloned()
    }

    pub fn prune(&mut self, now: u64, timeout: Duration) -> PruneOutcome {
        self.peers.prune(now, timeout)
    }

    /// The cluster key changed: nobody is trusted any more. Returns the
    /// peers that were demoted.
    pub fn revoke_all(&mut self) -> Result<Vec<Peer>> {
        let ids: Vec<String> = self.peers.trusted().map(|p| p.id.clone()).collect();
        let mut demoted = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(peer) = self.peers.set_trusted(&id, false) {
                demoted.push(peer.clone());
            }
        }
        self.revoked.clear();
        self.persist()?;
        self.persist_revoked()?;
        Ok(demoted)
    }

    /// Drop every peer and both files
    pub fn wipe(&mut self) -> Result<()> {
        self.peers.clear();
        self.revoked.clear();
        remove_file(&self.path)?;
        remove_file(&self.revoked_path)
    }

    fn persist(&self) -> Result<()> {
        write_json(&self.path, &self.peers.known())
    }

    fn persist_revoked(&self) -> Result<()> {
        if self.revoked.is_empty() {
            remove_file(&self.revoked_path)
        } else {
            write_json(&self.revoked_path, &self.revoked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> Peer {
        Peer {
            id: id.to_string(),
            address: "10.0.0.2:4654".parse().unwrap(),
            hostname: format!("host-{}", id),
            network_name: Some("alpha".into()),
            is_trusted: false,
            is_manual: false,
            last_seen: 100,
            online: true,
        }
    }

    #[test]
    fn test_trusted_peers_persist_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");

        let mut store = TrustStore::open(&path);
        store.add_trusted(peer("a")).unwrap();
        assert!(store.is_trusted("a"));

        let reopened = TrustStore::open(&path);
        let a = reopened.get("a").unwrap();
        assert!(a.is_trusted);
        assert!(!a.online);
    }

    #[test]
    fn test_untrusted_discoveries_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");

        let mut store = TrustStore::open(&path);
        store.add_trusted(peer("a")).unwrap();
        store
            .observe(
                PeerObservation {
                    id: "b".into(),
                    address: "10.0.0.3:4654".parse().unwrap(),
                    hostname: "b".into(),
                    network_name: None,
                    manual: false,
                },
                100,
            )
            .unwrap();
        store.remove_trusted("a").unwrap();

        let reopened = TrustStore::open(&path);
        assert!(reopened.peers().is_empty());
    }

    #[test]
    fn test_add_trusted_keeps_manual_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrustStore::open(&dir.path().join("known_peers.json"));
        let mut manual = peer("a");
        manual.is_manual = true;
        store.peers.upsert(manual);

        let trusted = store.add_trusted(peer("a")).unwrap();
        assert!(trusted.is_manual);
        assert!(trusted.is_trusted);
    }

    #[test]
    fn test_revoke_all_and_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");
        let mut store = TrustStore::open(&path);
        store.add_trusted(peer("a")).unwrap();
        store.add_trusted(peer("b")).unwrap();

        let demoted = store.revoke_all().unwrap();
        assert_eq!(demoted.len(), 2);
        assert!(store.trusted().is_empty());
        assert_eq!(store.peers().len(), 2);

        store.wipe().unwrap();
        assert!(store.peers().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_revocation_survives_restart_until_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");
        let mut store = TrustStore::open(&path);
        store.add_trusted(peer("a")).unwrap();

        let removed = store.revoke("a").unwrap();
        assert_eq!(removed.map(|p| p.id).as_deref(), Some("a"));
        assert!(store.get("a").is_none());
        assert!(store.is_revoked("a"));

        let mut reopened = TrustStore::open(&path);
        assert!(reopened.is_revoked("a"));
        assert!(reopened.peers().is_empty());

        reopened.add_trusted(peer("a")).unwrap();
        assert!(!reopened.is_revoked("a"));
        assert!(!TrustStore::open(&path).is_revoked("a"));
    }

    #[test]
    fn test_key_change_lifts_revocations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");
        let mut store = TrustStore::open(&path);
        store.add_trusted(peer("a")).unwrap();
        store.revoke("a").unwrap();

        store.revoke_all().unwrap();
        assert!(!store.is_revoked("a"));

        store.revoke("b").unwrap();
        store.wipe().unwrap();
        assert!(!store.is_revoked("b"));
        assert!(!dir.path().join(REVOKED_PEERS_FILE).exists());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_peers.json");
        std::fs::write(&path, b"nope").unwrap();
        assert!(TrustStore::open(&path).peers().is_empty());
    }
}
