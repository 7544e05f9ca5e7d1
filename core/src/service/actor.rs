//! The coordinating task
//!
//! Owns identity, cluster key, trust store, clipboard state and settings.
//! Everything else reaches them through [`Command`]s. Handlers never wait on
//! the network: slow work is spawned and reports back with another command.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::clipboard::{
    ClipboardBackend, ClipboardContent, ClipboardEntry, EntryOrigin, History, LocalDecision,
    PendingState, PreparedContent, RemoteDecision, SyncEngine,
};
use crate::crypto::{Claim, ClaimPurpose, ClusterKey, EncryptedPayload};
use crate::discovery::{self, DiscoveryService};
use crate::error::PairingFailure;
use crate::identity::IdentityStore;
use crate::pairing::{
    ClusterSecret, LocalDevice, PairingOutcome, PairingRegistry, PairingState, ResponderContext,
};
use crate::peers::{Peer, PeerObservation};
use crate::protocol::constants::{
    FILE_CHUNK_TIMEOUT, PEER_LIVENESS_TIMEOUT, PROTOCOL_VERSION, PRUNE_INTERVAL, SCAN_BATCH_SIZE,
};
use crate::protocol::{FileRequestBody, HelloMessage, HistoryDeleteBody, Message};
use crate::service::notify::{Notification, Notifier};
use crate::service::{NetworkStatus, SETTINGS_FILE};
use crate::settings::Settings;
use crate::sync::connection::deliver;
use crate::sync::{Outbox, SyncServerHandle};
use crate::transfer::{download, sanitize_name, DownloadPlan, Downloads, OfferedFiles};
use crate::trust::{destruct_command, verify_destruct, TrustStore};
use crate::{now_secs, Config, Error, Result};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// What a joiner needs to run the handshake outside the actor
#[derive(Debug, Clone)]
pub(crate) struct PairingTicket {
    pub token: u64,
    pub addr: SocketAddr,
    pub me: LocalDevice,
}

/// An authorized file request
#[derive(Debug, Clone)]
pub(crate) struct ServedFile {
    pub path: PathBuf,
    pub request: FileRequestBody,
    pub key: ClusterKey,
}

pub(crate) enum Command {
    Status {
        respond_to: oneshot::Sender<NetworkStatus>,
    },
    GetPeers {
        respond_to: oneshot::Sender<Vec<Peer>>,
    },
    GetKnownPeers {
        respond_to: oneshot::Sender<Vec<Peer>>,
    },
    GetSettings {
        respond_to: oneshot::Sender<Settings>,
    },
    SaveSettings {
        settings: Settings,
        respond_to: Reply<()>,
    },
    GetHistory {
        respond_to: oneshot::Sender<Vec<ClipboardEntry>>,
    },
    GetPending {
        respond_to: oneshot::Sender<PendingState>,
    },
    LocalHello {
        respond_to: Reply<HelloMessage>,
    },

    SetNetworkIdentity {
        network_name: String,
        network_pin: String,
        respond_to: Reply<()>,
    },
    RegenerateNetworkIdentity {
        respond_to: Reply<()>,
    },
    LeaveNetwork {
        respond_to: Reply<()>,
    },

    /// A hello from `source`, inbound or in reply to a probe
    Presence {
        hello: HelloMessage,
        source: SocketAddr,
        manual: bool,
        respond_to: Option<Reply<Peer>>,
    },
    Discovered(PeerObservation),
    Lost(String),

    BeginPairing {
        peer_id: String,
        respond_to: Reply<PairingTicket>,
    },
    AttachPairing {
        peer_id: String,
        token: u64,
        task: AbortHandle,
    },
    PairingAdvanced {
        peer_id: String,
        token: u64,
    },
    CompletePairing {
        peer_id: String,
        token: u64,
        outcome: std::result::Result<PairingOutcome, PairingFailure>,
        respond_to: Reply<Peer>,
    },
    ResponderContext {
        respond_to: oneshot::Sender<ResponderContext>,
    },
    JoinerAccepted {
        peer: Peer,
        key: [u8; 32],
    },

    KickPeer {
        peer_id: String,
        respond_to: Reply<Option<(SocketAddr, Message)>>,
    },
    Destruct {
        sender_id: String,
        sealed: EncryptedPayload,
        source: SocketAddr,
        respond_to: Reply<()>,
    },

    LocalClipboard {
        prepared: PreparedContent,
    },
    Publish {
        prepared: PreparedContent,
        respond_to: Reply<ClipboardEntry>,
    },
    SendPending {
        respond_to: Reply<ClipboardEntry>,
    },
    SetLocalClipboard {
        content: ClipboardContent,
        respond_to: Reply<()>,
    },
    ConfirmPending {
        respond_to: Reply<Option<ClipboardEntry>>,
    },
    CopyHistoryItem {
        id: Uuid,
        respond_to: Reply<()>,
    },
    ResendHistoryItem {
        id: Uuid,
        respond_to: Reply<ClipboardEntry>,
    },
    DeleteHistoryItem {
        id: Uuid,
        respond_to: Reply<()>,
    },
    RemoteClipboard {
        sender_id: String,
        sealed: EncryptedPayload,
        source: SocketAddr,
        respond_to: Reply<()>,
    },
    RemoteHistoryDelete {
        sender_id: String,
        sealed: EncryptedPayload,
        source: SocketAddr,
        respond_to: Reply<()>,
    },

    RequestFile {
        entry_id: Uuid,
        file_index: usize,
        peer_id: String,
        respond_to: Reply<()>,
    },
    ResolveFileRequest {
        sender_id: String,
        sealed: EncryptedPayload,
        source: SocketAddr,
        respond_to: Reply<ServedFile>,
    },
    DownloadFinished {
        entry_id: Uuid,
        file_index: usize,
        result: std::result::Result<PathBuf, String>,
    },

    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

pub(crate) struct Actor {
    pub config: Arc<Config>,
    pub port: u16,
    /// Name used when the settings carry no custom one
    pub base_hostname: String,
    pub identity: IdentityStore,
    pub trust: TrustStore,
    pub settings: Settings,
    pub engine: SyncEngine,
    pub history: History,
    pub offered: OfferedFiles,
    pub downloads: Downloads,
    pub pairing: PairingRegistry,
    pub clipboard: Arc<dyn ClipboardBackend>,
    pub notifier: Notifier,
    pub outbox: Outbox,
    pub server: SyncServerHandle,
    pub discovery: Option<DiscoveryService>,
    pub tasks: Vec<JoinHandle<()>>,
    pub commands: mpsc::WeakSender<Command>,
}

impl Actor {
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.advertise();

        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { respond_to }) => {
                        self.stop();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                _ = prune.tick() => self.prune(),
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }

        tracing::info!("cluster service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            Command::GetPeers { respond_to } => {
                let _ = respond_to.send(self.trust.peers().all());
            }
            Command::GetKnownPeers { respond_to } => {
                let _ = respond_to.send(self.trust.peers().known());
            }
            Command::GetSettings { respond_to } => {
                let _ = respond_to.send(self.settings.clone());
            }
            Command::SaveSettings {
                settings,
                respond_to,
            } => {
                let _ = respond_to.send(self.save_settings(settings));
            }
            Command::GetHistory { respond_to } => {
                let _ = respond_to.send(self.history.entries());
            }
            Command::GetPending { respond_to } => {
                let _ = respond_to.send(self.engine.pending());
            }
            Command::LocalHello { respond_to } => {
                let _ = respond_to.send(self.local_hello());
            }

            Command::SetNetworkIdentity {
                network_name,
                network_pin,
                respond_to,
            } => {
                let result = self
                    .identity
                    .set_cluster_identity(&network_name, &network_pin)
                    .and_then(|_| self.cluster_changed());
                let _ = respond_to.send(result);
            }
            Command::RegenerateNetworkIdentity { respond_to } => {
                let result = self
                    .identity
                    .regenerate_cluster_identity()
                    .and_then(|_| self.cluster_changed());
                let _ = respond_to.send(result);
            }
            Command::LeaveNetwork { respond_to } => {
                tracing::info!("leaving network {}", self.identity.cluster().network_name);
                let _ = respond_to.send(self.factory_reset());
            }

            Command::Presence {
                hello,
                source,
                manual,
                respond_to,
            } => {
                let result = self.on_presence(hello, source, manual);
                match respond_to {
                    Some(respond_to) => {
                        let _ = respond_to.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::debug!("ignored hello from {}: {}", source, e);
                        }
                    }
                }
            }
            Command::Discovered(observation) => self.on_discovered(observation),
            Command::Lost(peer_id) => {
                if let Some(peer) = self.trust.mark_offline(&peer_id) {
                    tracing::debug!("{} withdrew its advertisement", peer.hostname);
                    self.notifier.notify(Notification::PeerUpdate { peer });
                }
            }

            Command::BeginPairing {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.begin_pairing(&peer_id));
            }
            Command::AttachPairing {
                peer_id,
                token,
                task,
            } => {
                self.pairing.attach(&peer_id, token, task);
            }
            Command::PairingAdvanced { peer_id, token } => {
                self.pairing
                    .advance(&peer_id, token, PairingState::AwaitingVerification);
            }
            Command::CompletePairing {
                peer_id,
                token,
                outcome,
                respond_to,
            } => {
                let _ = respond_to.send(self.complete_pairing(&peer_id, token, outcome));
            }
            Command::ResponderContext { respond_to } => {
                let _ = respond_to.send(self.responder_context());
            }
            Command::JoinerAccepted { peer, key } => self.joiner_accepted(peer, key),

            Command::KickPeer {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.kick_peer(&peer_id));
            }
            Command::Destruct {
                sender_id,
                sealed,
                source,
                respond_to,
            } => self.on_destruct(&sender_id, &sealed, source, respond_to),

            Command::LocalClipboard { prepared } => self.on_local_clipboard(prepared),
            Command::Publish {
                prepared,
                respond_to,
            } => {
                let _ = respond_to.send(self.publish(prepared));
            }
            Command::SendPending { respond_to } => {
                let _ = respond_to.send(self.send_pending());
            }
            Command::SetLocalClipboard {
                content,
                respond_to,
            } => {
                let _ = respond_to.send(self.write_local(content));
            }
            Command::ConfirmPending { respond_to } => {
                let _ = respond_to.send(Ok(self.confirm_pending()));
            }
            Command::CopyHistoryItem { id, respond_to } => {
                let _ = respond_to.send(self.copy_history_item(id));
            }
            Command::ResendHistoryItem { id, respond_to } => {
                let _ = respond_to.send(self.resend_history_item(id));
            }
            Command::DeleteHistoryItem { id, respond_to } => {
                let _ = respond_to.send(self.delete_history_item(id));
            }
            Command::RemoteClipboard {
                sender_id,
                sealed,
                source,
                respond_to,
            } => {
                let result = self.on_remote_clipboard(&sender_id, &sealed, source);
                if let Err(e) = &result {
                    tracing::warn!("rejected clipboard from {} ({}): {}", sender_id, source, e);
                }
                let _ = respond_to.send(result);
            }
            Command::RemoteHistoryDelete {
                sender_id,
                sealed,
                source,
                respond_to,
            } => {
                let _ = respond_to.send(self.on_remote_history_delete(&sender_id, &sealed, source));
            }

            Command::RequestFile {
                entry_id,
                file_index,
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.request_file(entry_id, file_index, &peer_id));
            }
            Command::ResolveFileRequest {
                sender_id,
                sealed,
                source,
                respond_to,
            } => {
                let _ = respond_to.send(self.resolve_file_request(&sender_id, &sealed, source));
            }
            Command::DownloadFinished {
                entry_id,
                file_index,
                result,
            } => self.download_finished(entry_id, file_index, result),

            Command::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn status(&self) -> NetworkStatus {
        let identity = self.identity.identity();
        let cluster = self.identity.cluster();

        NetworkStatus {
            device_id: identity.device_id,
            hostname: identity.hostname,
            platform: identity.platform,
            network_name: cluster.network_name.clone(),
            network_pin: cluster.network_pin.clone(),
            mode: cluster.mode,
            key_fingerprint: cluster.key.fingerprint(),
            port: self.port,
        }
    }

    fn local_device(&self) -> LocalDevice {
        LocalDevice {
            device_id: self.identity.device_id().to_string(),
            hostname: self.identity.hostname().to_string(),
            port: self.port,
        }
    }

    fn key(&self) -> &ClusterKey {
        &self.identity.cluster().key
    }

    fn advertise(&mut self) {
        let Some(discovery) = self.discovery.as_mut() else {
            return;
        };
        let cluster = self.identity.cluster();
        if let Err(e) = discovery.register(
            self.identity.device_id(),
            self.identity.hostname(),
            &cluster.network_name,
            self.port,
        ) {
            tracing::warn!("failed to advertise: {}", e);
        }
    }

    fn stop(&mut self) {
        self.pairing.cancel_all();
        self.server.abort();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(discovery) = self.discovery.take() {
            if let Err(e) = discovery.shutdown() {
                tracing::debug!("discovery shutdown: {}", e);
            }
        }
    }

    fn save_settings(&mut self, settings: Settings) -> Result<()> {
        settings.save(&self.config.data_dir.join(SETTINGS_FILE))?;

        for entry_id in self.history.set_limit(settings.history_limit) {
            self.offered.remove(entry_id);
            self.downloads.forget(entry_id);
            self.notifier.notify(Notification::HistoryDelete { entry_id });
        }
        self.offered.set_limit(settings.history_limit);

        let hostname = settings.device_name(&self.base_hostname);
        let renamed = hostname != self.identity.hostname();
        self.identity.set_hostname(hostname);
        self.settings = settings.clone();
        if renamed {
            self.advertise();
        }

        self.notifier.notify(Notification::SettingsChanged { settings });
        Ok(())
    }

    // Presence and liveness

    fn local_hello(&self) -> Result<HelloMessage> {
        let cluster = self.identity.cluster();
        let proof = Claim::new(
            ClaimPurpose::Presence,
            self.identity.device_id(),
            &cluster.network_name,
        )
        .seal(&cluster.key)?;

        Ok(HelloMessage {
            device_id: self.identity.device_id().to_string(),
            hostname: self.identity.hostname().to_string(),
            port: self.port,
            network_name: cluster.network_name.clone(),
            protocol_version: PROTOCOL_VERSION,
            proof: Some(proof),
        })
    }

    fn proves_membership(&self, hello: &HelloMessage, now: u64) -> bool {
        let Some(proof) = hello.proof.as_ref() else {
            return false;
        };
        Claim::open(self.key(), proof, ClaimPurpose::Presence, now)
            .map(|claim| claim.issuer == hello.device_id)
            .unwrap_or(false)
    }

    fn announce_peer(&self, before: Option<&Peer>, after: &Peer) {
        let changed = match before {
            Some(b) => {
                b.is_trusted != after.is_trusted
                    || b.online != after.online
                    || b.address != after.address
                    || b.hostname != after.hostname
                    || b.network_name != after.network_name
                    || b.is_manual != after.is_manual
            }
            None => true,
        };
        if changed {
            self.notifier.notify(Notification::PeerUpdate {
                peer: after.clone(),
            });
        }
    }

    fn on_presence(&mut self, hello: HelloMessage, source: SocketAddr, manual: bool) -> Result<Peer> {
        if hello.device_id == self.identity.device_id() {
            return Err(Error::InvalidState("that address is this device".to_string()));
        }
        if hello.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                "{} speaks protocol {}, we speak {}",
                hello.device_id,
                hello.protocol_version,
                PROTOCOL_VERSION
            );
        }

        let now = now_secs();
        let proven = self.proves_membership(&hello, now);
        let address = SocketAddr::new(source.ip(), hello.port);

        if self.trust.is_revoked(&hello.device_id) {
            if proven {
                self.redeliver_destruct(&hello.device_id, address);
            }
            return Err(Error::NotTrusted(format!(
                "{} was removed from the network",
                hello.device_id
            )));
        }

        let before = self.trust.get(&hello.device_id).cloned();
        let observation = PeerObservation {
            id: hello.device_id,
            address,
            hostname: hello.hostname,
            network_name: Some(hello.network_name),
            manual,
        };
        let (mut peer, _) = self.trust.observe(observation, now)?;

        if proven && !peer.is_trusted {
            tracing::info!("{} ({}) holds the network key", peer.hostname, peer.id);
            peer = self.trust.add_trusted(peer)?;
        }

        self.announce_peer(before.as_ref(), &peer);
        Ok(peer)
    }

    fn on_discovered(&mut self, observation: PeerObservation) {
        if observation.id == self.identity.device_id() || self.trust.is_revoked(&observation.id) {
            return;
        }

        let before = self.trust.get(&observation.id).cloned();
        let same_network =
            observation.network_name.as_deref() == Some(self.identity.cluster().network_name.as_str());

        match self.trust.observe(observation, now_secs()) {
            Ok((peer, is_new)) => {
                self.announce_peer(before.as_ref(), &peer);
                // Same name may mean same key; a hello exchange settles it.
                if is_new && same_network && !peer.is_trusted {
                    self.probe(vec![peer]);
                }
            }
            Err(e) => tracing::warn!("failed to record discovered peer: {}", e),
        }
    }

    /// Touch a peer that just talked to us
    fn touch(&mut self, peer_id: &str) {
        let Some(before) = self.trust.get(peer_id).cloned() else {
            return;
        };
        let observation = PeerObservation {
            id: before.id.clone(),
            address: before.address,
            hostname: String::new(),
            network_name: None,
            manual: false,
        };
        if let Ok((after, _)) = self.trust.observe(observation, now_secs()) {
            self.announce_peer(Some(&before), &after);
        }
    }

    fn prune(&mut self) {
        let outcome = self.trust.prune(now_secs(), PEER_LIVENESS_TIMEOUT);

        for peer in outcome.offline {
            tracing::info!("{} ({}) went offline", peer.hostname, peer.id);
            self.notifier.notify(Notification::PeerUpdate { peer });
        }
        for peer in outcome.removed {
            tracing::debug!("forgot {} ({})", peer.hostname, peer.id);
            self.notifier.notify(Notification::PeerRemove { peer_id: peer.id });
        }
    }

    /// Ping trusted and manual peers; discovery cannot see routed ones
    fn heartbeat(&self) {
        let targets = self
            .trust
            .peers()
            .all()
            .into_iter()
            .filter(|p| p.is_trusted || p.is_manual)
            .collect();
        self.probe(targets);
    }

    /// Exchange hellos with `targets` in the background
    fn probe(&self, targets: Vec<Peer>) {
        if targets.is_empty() {
            return;
        }
        let hello = match self.local_hello() {
            Ok(hello) => Message::Hello(hello),
            Err(e) => {
                tracing::error!("cannot build hello: {}", e);
                return;
            }
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let manual: HashSet<SocketAddr> = targets
            .iter()
            .filter(|p| p.is_manual)
            .map(|p| p.address)
            .collect();
        let addrs = targets.iter().map(|p| p.address).collect();
        let timeout = self.config.request_timeout;

        tokio::spawn(async move {
            for (addr, reply) in discovery::scan(addrs, hello, timeout, SCAN_BATCH_SIZE).await {
                let command = Command::Presence {
                    hello: reply,
                    source: addr,
                    manual: manual.contains(&addr),
                    respond_to: None,
                };
                if commands.send(command).await.is_err() {
                    break;
                }
            }
        });
    }

    // Pairing

    fn begin_pairing(&mut self, peer_id: &str) -> Result<PairingTicket> {
        let peer = self
            .trust
            .get(peer_id)
            .cloned()
            .ok_or_else(|| Error::UnknownPeer(peer_id.to_string()))?;

        let (token, _) = self.pairing.begin(peer_id);
        tracing::info!("pairing with {} at {}", peer.hostname, peer.address);

        Ok(PairingTicket {
            token,
            addr: peer.address,
            me: self.local_device(),
        })
    }

    fn complete_pairing(
        &mut self,
        peer_id: &str,
        token: u64,
        outcome: std::result::Result<PairingOutcome, PairingFailure>,
    ) -> Result<Peer> {
        let outcome = if self.pairing.finish(peer_id, token) {
            outcome
        } else {
            Err(PairingFailure::Superseded)
        };

        match outcome {
            Ok(outcome) => self.join_cluster(outcome),
            Err(reason) => {
                tracing::warn!("pairing with {} failed: {}", peer_id, reason);
                self.notifier.notify(Notification::PairingFailed {
                    peer_id: peer_id.to_string(),
                    reason: reason.clone(),
                });
                Err(Error::Pairing(reason))
            }
        }
    }

    fn join_cluster(&mut self, outcome: PairingOutcome) -> Result<Peer> {
        let PairingOutcome { responder, secret } = outcome;

        self.identity.install(secret.cluster())?;
        self.pairing.cancel_all();
        self.outbox.forget_all();
        for peer in self.trust.revoke_all()? {
            self.notifier.notify(Notification::PeerUpdate { peer });
        }

        let responder = self.trust.add_trusted(responder)?;
        self.notifier.notify(Notification::PeerUpdate {
            peer: responder.clone(),
        });

        let my_id = self.identity.device_id().to_string();
        for mut member in secret.members {
            if member.id == my_id || member.id == responder.id {
                continue;
            }
            member.online = false;
            let member = self.trust.add_trusted(member)?;
            self.notifier.notify(Notification::PeerUpdate { peer: member });
        }

        self.advertise();
        self.notifier.notify(Notification::NetworkUpdate {
            network_name: secret.network_name,
        });

        // The other members trust us once they see our proof.
        self.heartbeat();
        Ok(responder)
    }

    fn responder_context(&self) -> ResponderContext {
        let cluster = self.identity.cluster();
        ResponderContext {
            device_id: self.identity.device_id().to_string(),
            hostname: self.identity.hostname().to_string(),
            pin: cluster.network_pin.clone(),
            secret: ClusterSecret::new(cluster, self.trust.trusted()),
        }
    }

    fn joiner_accepted(&mut self, peer: Peer, key: [u8; 32]) {
        if key != self.key().to_bytes() {
            tracing::warn!("{} joined with a key that has since been replaced", peer.id);
            return;
        }
        let before = self.trust.get(&peer.id).cloned();
        match self.trust.add_trusted(peer) {
            Ok(peer) => self.announce_peer(before.as_ref(), &peer),
            Err(e) => tracing::error!("failed to store new member: {}", e),
        }
    }

    // Trust

    fn kick_peer(&mut self, peer_id: &str) -> Result<Option<(SocketAddr, Message)>> {
        let peer = self
            .trust
            .get(peer_id)
            .cloned()
            .ok_or_else(|| Error::UnknownPeer(peer_id.to_string()))?;

        let command = if peer.is_trusted {
            let message = destruct_command(self.key(), self.identity.device_id(), peer_id)?;
            Some((peer.address, message))
        } else {
            None
        };

        if peer.is_trusted {
            self.trust.revoke(peer_id)?;
        } else {
            self.trust.remove_trusted(peer_id)?;
        }
        self.outbox.forget(peer_id);
        self.notifier.notify(Notification::PeerRemove {
            peer_id: peer_id.to_string(),
        });
        tracing::info!("removed {} ({})", peer.hostname, peer.id);

        Ok(command)
    }

    /// A removed peer showed up still holding the key: tell it again
    fn redeliver_destruct(&self, peer_id: &str, addr: SocketAddr) {
        let message = match destruct_command(self.key(), self.identity.device_id(), peer_id) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("cannot build destruct for {}: {}", peer_id, e);
                return;
            }
        };
        let peer_id = peer_id.to_string();
        let timeout = self.config.request_timeout;

        tracing::info!("{} is back after removal, sending destruct again", peer_id);
        tokio::spawn(async move {
            match deliver(addr, &message, timeout).await {
                Ok(()) => tracing::info!("{} accepted the destruct command", peer_id),
                Err(e) => tracing::debug!("{} ignored the destruct command: {}", peer_id, e),
            }
        });
    }

    fn require_trusted(&self, sender_id: &str, source: SocketAddr) -> Result<()> {
        if self.trust.is_trusted_at(sender_id, source.ip()) {
            Ok(())
        } else {
            Err(Error::NotTrusted(format!("{} at {}", sender_id, source.ip())))
        }
    }

    fn on_destruct(
        &mut self,
        sender_id: &str,
        sealed: &EncryptedPayload,
        source: SocketAddr,
        respond_to: Reply<()>,
    ) {
        let verdict = self.require_trusted(sender_id, source).and_then(|_| {
            verify_destruct(self.key(), self.identity.device_id(), sender_id, sealed, now_secs())
        });

        match verdict {
            Ok(_) => {
                tracing::warn!("removed from network by {}", sender_id);
                let _ = respond_to.send(Ok(()));
                if let Err(e) = self.factory_reset() {
                    tracing::error!("factory reset failed: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("dropping destruct from {} ({}): {}", sender_id, source, e);
                let _ = respond_to.send(Err(e));
            }
        }
    }

    /// New key: every existing trust relationship is void
    fn cluster_changed(&mut self) -> Result<()> {
        self.pairing.cancel_all();
        self.outbox.forget_all();
        for peer in self.trust.revoke_all()? {
            self.notifier.notify(Notification::PeerUpdate { peer });
        }

        self.advertise();
        self.notifier.notify(Notification::NetworkUpdate {
            network_name: self.identity.cluster().network_name.clone(),
        });
        Ok(())
    }

    fn factory_reset(&mut self) -> Result<()> {
        let peers = self.trust.peers().all();

        self.pairing.cancel_all();
        self.outbox.forget_all();
        self.identity.factory_reset()?;
        self.trust.wipe()?;
        self.engine = SyncEngine::new();

        for peer in peers {
            self.notifier.notify(Notification::PeerRemove { peer_id: peer.id });
        }

        self.advertise();
        self.notifier.notify(Notification::NetworkReset);
        self.notifier.notify(Notification::NetworkUpdate {
            network_name: self.identity.cluster().network_name.clone(),
        });

        tracing::info!(
            "reset to a network of one: {} as {}",
            self.identity.cluster().network_name,
            self.identity.device_id()
        );
        Ok(())
    }

    // Clipboard

    fn broadcast(&self, message: Message) {
        self.broadcast_except(message, &[]);
    }

    fn broadcast_except(&self, message: Message, skip: &[&str]) {
        for peer in self.trust.trusted() {
            if skip.contains(&peer.id.as_str()) {
                continue;
            }
            self.outbox.enqueue(&peer.id, peer.address, message.clone());
        }
    }

    fn on_local_clipboard(&mut self, prepared: PreparedContent) {
        match self.engine.on_local_change(prepared, self.settings.auto_send) {
            LocalDecision::Broadcast(prepared) => {
                if let Err(e) = self.publish(prepared) {
                    tracing::warn!("failed to send clipboard: {}", e);
                }
            }
            LocalDecision::Pending(prepared) => {
                self.notifier.notify(Notification::ClipboardMonitorUpdate {
                    pending: Some(prepared.signature()),
                });
            }
            LocalDecision::Ignored => {}
        }
    }

    /// Record a new local entry and send it to every trusted peer
    fn publish(&mut self, prepared: PreparedContent) -> Result<ClipboardEntry> {
        let had_pending = self.engine.pending().send.is_some();
        let entry = ClipboardEntry::local(
            &prepared,
            self.identity.device_id(),
            self.identity.hostname(),
        );
        let sealed = self.key().seal_json(&entry)?;

        if let ClipboardContent::Files(paths) = prepared.content {
            self.offered.offer(entry.id, paths);
        }
        self.history.push(entry.clone());
        self.engine.mark_sent(&entry.signature());

        self.broadcast(Message::ClipboardSync {
            sender_id: self.identity.device_id().to_string(),
            sealed,
        });
        tracing::debug!("sent {}", entry.preview());

        self.notifier.notify(Notification::ClipboardChange {
            entry: entry.clone(),
        });
        if had_pending && self.engine.pending().send.is_none() {
            self.notifier
                .notify(Notification::ClipboardMonitorUpdate { pending: None });
        }
        Ok(entry)
    }

    fn send_pending(&mut self) -> Result<ClipboardEntry> {
        let prepared = self
            .engine
            .take_pending_send()
            .ok_or_else(|| Error::InvalidState("nothing pending to send".to_string()))?;

        let entry = self.publish(prepared)?;
        self.notifier
            .notify(Notification::ClipboardMonitorUpdate { pending: None });
        Ok(entry)
    }

    /// Put `content` on the local clipboard on the user's behalf
    fn write_local(&mut self, content: ClipboardContent) -> Result<()> {
        self.clipboard.write(&content)?;
        let stored = self.clipboard.stored_form(&content);
        self.engine.note_local_write(&stored.signature());
        Ok(())
    }

    fn confirm_pending(&mut self) -> Option<ClipboardEntry> {
        let entry = self.engine.confirm_pending_receive()?;
        self.apply_remote(&entry, true);
        Some(entry)
    }

    fn apply_remote(&mut self, entry: &ClipboardEntry, explicit: bool) {
        if entry.has_files() {
            self.receive_files(entry, explicit);
        } else if let Some(text) = &entry.text {
            if let Err(e) = self.clipboard.write(&ClipboardContent::Text(text.clone())) {
                tracing::warn!("failed to write clipboard: {}", e);
            }
        }
    }

    fn receive_files(&mut self, entry: &ClipboardEntry, explicit: bool) {
        let total_size = entry.total_file_size();

        if explicit || total_size <= self.settings.max_auto_download_size {
            if let Err(e) = self.fetch_entry(entry, true) {
                tracing::info!("not fetching files of {}: {}", entry.id, e);
            }
        } else {
            self.notifier.notify(Notification::FilesAvailable {
                entry_id: entry.id,
                peer_id: entry.sender_device_id.clone(),
                total_size,
            });
        }
    }

    /// Download every file of `entry` that is not already on its way
    fn fetch_entry(&mut self, entry: &ClipboardEntry, apply_to_clipboard: bool) -> Result<()> {
        if !self.settings.enable_file_transfer {
            return Err(Error::InvalidState("file transfer is disabled".to_string()));
        }

        let count = entry.manifest().len();
        self.downloads.expect(entry.id, count, apply_to_clipboard);
        for file_index in 0..count {
            if self.downloads.is_active(entry.id, file_index) {
                continue;
            }
            if let Err(e) = self.start_download(entry.id, file_index, &entry.sender_device_id) {
                tracing::warn!("cannot fetch file {} of {}: {}", file_index, entry.id, e);
            }
        }
        Ok(())
    }

    fn local_files(&self, entry: &ClipboardEntry) -> Option<Vec<PathBuf>> {
        self.offered
            .paths(entry.id)
            .map(|paths| paths.to_vec())
            .or_else(|| self.downloads.received(entry.id))
    }

    fn history_entry(&self, id: Uuid) -> Result<ClipboardEntry> {
        self.history
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("no history entry {}", id)))
    }

    fn copy_history_item(&mut self, id: Uuid) -> Result<()> {
        let entry = self.history_entry(id)?;

        if !entry.has_files() {
            return self.write_local(ClipboardContent::Text(entry.text.unwrap_or_default()));
        }
        match self.local_files(&entry) {
            Some(paths) => self.write_local(ClipboardContent::Files(paths)),
            None => self.fetch_entry(&entry, true),
        }
    }

    fn resend_history_item(&mut self, id: Uuid) -> Result<ClipboardEntry> {
        let entry = self.history_entry(id)?;

        let prepared = if entry.has_files() {
            let paths = self.local_files(&entry).ok_or_else(|| {
                Error::InvalidState(format!("files of {} are not available locally", id))
            })?;
            PreparedContent {
                content: ClipboardContent::Files(paths),
                manifest: entry.manifest().to_vec(),
            }
        } else {
            PreparedContent::text(entry.text.unwrap_or_default())
        };

        self.publish(prepared)
    }

    fn forget_entry(&mut self, id: Uuid) -> bool {
        self.offered.remove(id);
        self.downloads.forget(id);
        self.history.remove(id).is_some()
    }

    fn delete_history_item(&mut self, id: Uuid) -> Result<()> {
        if !self.forget_entry(id) {
            return Err(Error::InvalidState(format!("no history entry {}", id)));
        }
        self.notifier.notify(Notification::HistoryDelete { entry_id: id });

        let sealed = self.key().seal_json(&HistoryDeleteBody { entry_id: id })?;
        self.broadcast(Message::HistoryDelete {
            sender_id: self.identity.device_id().to_string(),
            sealed,
        });
        Ok(())
    }

    fn on_remote_clipboard(
        &mut self,
        sender_id: &str,
        sealed: &EncryptedPayload,
        source: SocketAddr,
    ) -> Result<()> {
        self.require_trusted(sender_id, source)?;

        let mut entry: ClipboardEntry = self.key().open_json(sealed)?;
        if entry.sender_device_id == self.identity.device_id() {
            tracing::debug!("{} relayed our own entry {} back", sender_id, entry.id);
            return Ok(());
        }
        entry.origin = EntryOrigin::Remote;
        if let Some(files) = entry.files.as_mut() {
            for file in files.iter_mut() {
                file.name = sanitize_name(&file.name);
            }
        }

        self.touch(sender_id);
        if !self.history.push(entry.clone()) {
            tracing::debug!("already have entry {}", entry.id);
            return Ok(());
        }
        tracing::debug!("received {} from {}", entry.preview(), entry.sender_hostname);
        self.notifier.notify(Notification::ClipboardChange {
            entry: entry.clone(),
        });

        // Members that cannot reach the origin directly still get it.
        if self.settings.auto_send {
            self.relay(&entry, sender_id);
        }

        match self.engine.on_remote_entry(entry, self.settings.auto_receive) {
            RemoteDecision::Apply(entry) => self.apply_remote(&entry, false),
            RemoteDecision::Pending(entry) => {
                self.notifier.notify(Notification::ClipboardPending { entry });
            }
            RemoteDecision::Ignored => {}
        }
        Ok(())
    }

    fn relay(&self, entry: &ClipboardEntry, via: &str) {
        let sealed = match self.key().seal_json(entry) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!("cannot relay {}: {}", entry.id, e);
                return;
            }
        };
        self.broadcast_except(
            Message::ClipboardSync {
                sender_id: self.identity.device_id().to_string(),
                sealed,
            },
            &[via, entry.sender_device_id.as_str()],
        );
    }

    fn on_remote_history_delete(
        &mut self,
        sender_id: &str,
        sealed: &EncryptedPayload,
        source: SocketAddr,
    ) -> Result<()> {
        self.require_trusted(sender_id, source)?;
        let body: HistoryDeleteBody = self.key().open_json(sealed)?;

        if self.forget_entry(body.entry_id) {
            self.notifier.notify(Notification::HistoryDelete {
                entry_id: body.entry_id,
            });
        }
        Ok(())
    }

    // Files

    fn request_file(&mut self, entry_id: Uuid, file_index: usize, peer_id: &str) -> Result<()> {
        if !self.settings.enable_file_transfer {
            return Err(Error::InvalidState("file transfer is disabled".to_string()));
        }
        let entry = self.history_entry(entry_id)?;
        self.downloads.expect(entry_id, entry.manifest().len(), false);
        self.start_download(entry_id, file_index, peer_id)
    }

    fn start_download(&mut self, entry_id: Uuid, file_index: usize, peer_id: &str) -> Result<()> {
        let peer = self
            .trust
            .get(peer_id)
            .filter(|p| p.is_trusted)
            .cloned()
            .ok_or_else(|| Error::NotTrusted(peer_id.to_string()))?;

        let file = self
            .history_entry(entry_id)?
            .manifest()
            .get(file_index)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidState(format!("entry {} has no file {}", entry_id, file_index))
            })?;

        self.downloads.begin(entry_id, file_index)?;

        let plan = DownloadPlan {
            entry_id,
            file_index,
            peer_id: peer.id,
            addr: peer.address,
            key: self.key().clone(),
            my_id: self.identity.device_id().to_string(),
            file,
            dest_dir: self.config.download_dir.clone(),
            chunk_timeout: FILE_CHUNK_TIMEOUT,
        };
        let notifier = self.notifier.clone();
        let commands = self.commands.clone();

        tokio::spawn(async move {
            let result = download(&plan, |transferred, total| {
                notifier.notify(Notification::FileProgress {
                    entry_id,
                    file_index,
                    transferred,
                    total,
                })
            })
            .await
            .map_err(|e| e.to_string());

            if let Some(commands) = commands.upgrade() {
                let _ = commands
                    .send(Command::DownloadFinished {
                        entry_id,
                        file_index,
                        result,
                    })
                    .await;
            }
        });

        Ok(())
    }

    fn download_finished(
        &mut self,
        entry_id: Uuid,
        file_index: usize,
        result: std::result::Result<PathBuf, String>,
    ) {
        match result {
            Ok(path) => {
                tracing::info!("received {}", path.display());
                self.notifier.notify(Notification::FileReceived {
                    entry_id,
                    file_index,
                    path: path.clone(),
                });

                if let Some(paths) = self.downloads.finish(entry_id, file_index, Some(path)) {
                    if let Err(e) = self.write_local(ClipboardContent::Files(paths)) {
                        tracing::warn!("failed to put received files on the clipboard: {}", e);
                    }
                }
            }
            Err(reason) => {
                tracing::warn!("file {} of {} failed: {}", file_index, entry_id, reason);
                self.downloads.finish(entry_id, file_index, None);
                self.notifier.notify(Notification::FileFailed {
                    entry_id,
                    file_index,
                    reason,
                });
            }
        }
    }

    fn resolve_file_request(
        &self,
        sender_id: &str,
        sealed: &EncryptedPayload,
        source: SocketAddr,
    ) -> Result<ServedFile> {
        if !self.settings.enable_file_transfer {
            return Err(Error::InvalidState("file transfer is disabled".to_string()));
        }
        self.require_trusted(sender_id, source)?;

        let key = self.key().clone();
        let request: FileRequestBody = key.open_json(sealed)?;
        let path = self
            .offered
            .path(request.entry_id, request.file_index)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "file {} of {} is not offered",
                    request.file_index, request.entry_id
                ))
            })?;

        Ok(ServedFile { path, request, key })
    }
}
