//! Peer records and the runtime peer table

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Another device this one knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub address: SocketAddr,
    pub hostname: String,
    /// Network name the peer advertised, if it has advertised one
    pub network_name: Option<String>,
    pub is_trusted: bool,
    /// Added by address or range rather than found by multicast discovery
    pub is_manual: bool,
    /// Unix seconds
    pub last_seen: u64,
    #[serde(default)]
    pub online: bool,
}

/// One sighting of a peer, from mDNS, a `Hello` or a probe reply
#[derive(Debug, Clone)]
pub struct PeerObservation {
    pub id: String,
    pub address: SocketAddr,
    pub hostname: String,
    pub network_name: Option<String>,
    pub manual: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct PruneOutcome {
    /// Retained peers that just went offline
    pub offline: Vec<Peer>,
    /// Untrusted peers dropped from the table
    pub removed: Vec<Peer>,
}

#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_peers(peers: impl IntoIterator<Item = Peer>) -> Self {
        Self {
            peers: peers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Insert or refresh a peer. Trust is never changed here and a manual
    /// peer stays manual. Returns the updated record and whether it is new.
    pub fn observe(&mut self, obs: PeerObservation, now: u64) -> (Peer, bool) {
        let mut is_new = false;
        let peer = self.peers.entry(obs.id.clone()).or_insert_with(|| {
            is_new = true;
            Peer {
                id: obs.id.clone(),
                address: obs.address,
                hostname: obs.hostname.clone(),
                network_name: None,
                is_trusted: false,
                is_manual: false,
                last_seen: now,
                online: true,
            }
        });

        peer.address = obs.address;
        if !obs.hostname.is_empty() {
            peer.hostname = obs.hostname;
        }
        if obs.network_name.is_some() {
            peer.network_name = obs.network_name;
        }
        peer.is_manual |= obs.manual;
        peer.last_seen = peer.last_seen.max(now);
        peer.online = true;

        (peer.clone(), is_new)
    }

    /// Insert a full record, replacing any existing one
    pub fn upsert(&mut self, peer: Peer) {
        self.peers.insert(peer.id.clone(), peer);
    }

    pub fn set_trusted(&mut self, id: &str, trusted: bool) -> Option<&Peer> {
        let peer = self.peers.get_mut(id)?;
        peer.is_trusted = trusted;
        Some(peer)
    }

    pub fn mark_offline(&mut self, id: &str) -> Option<&Peer> {
        let peer = self.peers.get_mut(id)?;
        peer.online = false;
        Some(peer)
    }

    pub fn remove(&mut self, id: &str) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// All peers, trusted first, then by hostname
    pub fn all(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| {
            b.is_trusted
                .cmp(&a.is_trusted)
                .then_with(|| a.hostname.cmp(&b.hostname))
                .then_with(|| a.id.cmp(&b.id))
        });
        peers
    }

    pub fn trusted(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(|p| p.is_trusted)
    }

    /// Peers worth persisting: trusted or manually added
    pub fn known(&self) -> Vec<Peer> {
        self.all()
            .into_iter()
            .filter(|p| p.is_trusted || p.is_manual)
            .collect()
    }

    /// Whether `ip` matches the recorded address of trusted peer `id`
    pub fn is_trusted_at(&self, id: &str, ip: IpAddr) -> bool {
        self.peers
            .get(id)
            .map(|p| p.is_trusted && p.address.ip() == ip)
            .unwrap_or(false)
    }

    /// Mark peers unseen for `timeout` offline. Untrusted, non-manual ones
    /// are dropped; trusted and manual peers are retained.
    pub fn prune(&mut self, now: u64, timeout: Duration) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        let cutoff = now.saturating_sub(timeout.as_secs());

        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.last_seen < cutoff)
            .map(|p| p.id.clone())
            .collect();

        for id in stale {
            let retain = self
                .peers
                .get(&id)
                .map(|p| p.is_trusted || p.is_manual)
                .unwrap_or(false);

            if retain {
                if let Some(peer) = self.peers.get_mut(&id) {
                    if peer.online {
                        peer.online = false;
                        outcome.offline.push(peer.clone());
                    }
                }
            } else if let Some(peer) = self.peers.remove(&id) {
                outcome.removed.push(peer);
            }
        }

        outcome
    }
}
