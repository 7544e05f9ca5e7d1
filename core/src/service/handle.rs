//! The host-facing API
//!
//! A cheap, cloneable front for the coordinating task. Every method is a
//! request/response round trip over its command channel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::actor::{Command, PairingTicket, Reply};
use super::NetworkStatus;
use crate::clipboard::{ClipboardContent, ClipboardEntry, PendingState, PreparedContent};
use crate::discovery::{self, get_local_ips, resolve_target, ScanTarget};
use crate::error::PairingFailure;
use crate::pairing::initiate;
use crate::peers::Peer;
use crate::protocol::constants::{DEFAULT_PORT, PROBE_TIMEOUT, SCAN_BATCH_SIZE};
use crate::protocol::{HelloMessage, JoinInvite, Message};
use crate::settings::Settings;
use crate::sync::connection::deliver;
use crate::{Config, Error, Result};

#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
    config: Arc<Config>,
}

impl ServiceHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, config: Arc<Config>) -> Self {
        Self { commands, config }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        self.call(make).await?
    }

    pub(crate) async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::ServiceStopped)
    }

    // Identity and network

    pub async fn status(&self) -> Result<NetworkStatus> {
        self.call(|respond_to| Command::Status { respond_to }).await
    }

    pub async fn get_device_id(&self) -> Result<String> {
        Ok(self.status().await?.device_id)
    }

    pub async fn get_hostname(&self) -> Result<String> {
        Ok(self.status().await?.hostname)
    }

    pub async fn get_network_name(&self) -> Result<String> {
        Ok(self.status().await?.network_name)
    }

    pub async fn get_network_pin(&self) -> Result<String> {
        Ok(self.status().await?.network_pin)
    }

    /// Provision the cluster from a name and PIN. Every other device that
    /// was provisioned with the same pair shares the key.
    pub async fn set_network_identity(&self, network_name: &str, network_pin: &str) -> Result<()> {
        let network_name = network_name.to_string();
        let network_pin = network_pin.to_string();
        self.request(|respond_to| Command::SetNetworkIdentity {
            network_name,
            network_pin,
            respond_to,
        })
        .await
    }

    pub async fn regenerate_network_identity(&self) -> Result<()> {
        self.request(|respond_to| Command::RegenerateNetworkIdentity { respond_to })
            .await
    }

    /// Reset to a fresh network of one
    pub async fn leave_network(&self) -> Result<()> {
        self.request(|respond_to| Command::LeaveNetwork { respond_to })
            .await
    }

    /// Join invite for the first local address
    pub async fn invite(&self) -> Result<JoinInvite> {
        let status = self.status().await?;
        let host = get_local_ips()
            .into_iter()
            .find(|ip| ip.is_ipv4())
            .ok_or_else(|| Error::Network("no local address to invite to".to_string()))?;

        Ok(JoinInvite {
            host,
            port: status.port,
            network_name: status.network_name,
            pin: status.network_pin,
        })
    }

    // Peers

    /// Every known peer, trusted first
    pub async fn get_peers(&self) -> Result<Vec<Peer>> {
        self.call(|respond_to| Command::GetPeers { respond_to }).await
    }

    /// Trusted and manually added peers
    pub async fn get_known_peers(&self) -> Result<Vec<Peer>> {
        self.call(|respond_to| Command::GetKnownPeers { respond_to }).await
    }

    async fn local_hello(&self) -> Result<HelloMessage> {
        self.request(|respond_to| Command::LocalHello { respond_to })
            .await
    }

    async fn presence(&self, hello: HelloMessage, source: SocketAddr, manual: bool) -> Result<Peer> {
        self.request(|respond_to| Command::Presence {
            hello,
            source,
            manual,
            respond_to: Some(respond_to),
        })
        .await
    }

    /// Add a peer by `ip`, `ip:port`, hostname or CIDR range. Returns every
    /// device that answered.
    pub async fn add_manual_peer(&self, input: &str) -> Result<Vec<Peer>> {
        let hello = Message::Hello(self.local_hello().await?);

        match resolve_target(input, DEFAULT_PORT, &get_local_ips()).await? {
            ScanTarget::Single(addr) => {
                let reply = discovery::probe(addr, &hello, self.config.request_timeout).await?;
                Ok(vec![self.presence(reply, addr, true).await?])
            }
            ScanTarget::Range(addrs) => {
                tracing::info!("scanning {} addresses for {}", addrs.len(), input);
                let mut found = Vec::new();
                for (addr, reply) in discovery::scan(addrs, hello, PROBE_TIMEOUT, SCAN_BATCH_SIZE).await {
                    match self.presence(reply, addr, true).await {
                        Ok(peer) => found.push(peer),
                        Err(Error::ServiceStopped) => return Err(Error::ServiceStopped),
                        Err(e) => tracing::debug!("skipping {}: {}", addr, e),
                    }
                }
                Ok(found)
            }
        }
    }

    /// Remove a peer. A trusted peer is also told to wipe its membership;
    /// if it cannot be reached now, it is told again when it next shows up
    /// with the network key.
    pub async fn delete_peer(&self, peer_id: &str) -> Result<()> {
        let peer_id = peer_id.to_string();
        let command = self
            .request(|respond_to| Command::KickPeer {
                peer_id: peer_id.clone(),
                respond_to,
            })
            .await?;

        if let Some((addr, message)) = command {
            if let Err(e) = deliver(addr, &message, self.config.request_timeout).await {
                tracing::warn!(
                    "{} did not receive the destruct command, retrying when it reappears: {}",
                    peer_id,
                    e
                );
            }
        }
        Ok(())
    }

    // Pairing

    /// Join the cluster of `peer_id` using its PIN. A newer attempt for the
    /// same peer supersedes this one.
    pub async fn start_pairing(&self, peer_id: &str, pin: &str) -> Result<Peer> {
        let peer_id = peer_id.to_string();
        let PairingTicket { token, addr, me } = self
            .request(|respond_to| Command::BeginPairing {
                peer_id: peer_id.clone(),
                respond_to,
            })
            .await?;

        let pin = pin.to_string();
        let step_timeout = self.config.request_timeout;
        let deadline = self.config.pairing_timeout;
        let commands = self.commands.clone();
        let advanced_id = peer_id.clone();

        let task = tokio::spawn(async move {
            let on_response = move || {
                let _ = commands.try_send(Command::PairingAdvanced {
                    peer_id: advanced_id,
                    token,
                });
            };
            match tokio::time::timeout(deadline, initiate(addr, &me, &pin, step_timeout, on_response)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PairingFailure::Timeout),
            }
        });

        self.send(Command::AttachPairing {
            peer_id: peer_id.clone(),
            token,
            task: task.abort_handle(),
        })
        .await?;

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(PairingFailure::Superseded),
            Err(e) => Err(PairingFailure::Protocol(e.to_string())),
        };

        self.request(|respond_to| Command::CompletePairing {
            peer_id,
            token,
            outcome,
            respond_to,
        })
        .await
    }

    /// Find the member named by an invite and pair with it
    pub async fn join(&self, invite: &JoinInvite) -> Result<Peer> {
        let hello = Message::Hello(self.local_hello().await?);
        let addr = invite.address();
        let reply = discovery::probe(addr, &hello, self.config.request_timeout).await?;

        if reply.network_name != invite.network_name {
            tracing::warn!(
                "{} advertises network {}, invite says {}",
                addr,
                reply.network_name,
                invite.network_name
            );
        }

        let member = self.presence(reply, addr, true).await?;
        self.start_pairing(&member.id, &invite.pin).await
    }

    // Clipboard

    /// Send text to every trusted peer, regardless of auto-send
    pub async fn send_clipboard(&self, text: &str) -> Result<ClipboardEntry> {
        let prepared = PreparedContent::text(text);
        self.request(|respond_to| Command::Publish {
            prepared,
            respond_to,
        })
        .await
    }

    /// Offer files to every trusted peer
    pub async fn send_files(&self, paths: Vec<PathBuf>) -> Result<ClipboardEntry> {
        let prepared = PreparedContent::prepare(ClipboardContent::Files(paths)).await?;
        self.request(|respond_to| Command::Publish {
            prepared,
            respond_to,
        })
        .await
    }

    /// Feed a local clipboard change to the sync engine. The built-in
    /// monitor calls this; hosts with their own watcher may too.
    pub async fn observe_local_clipboard(&self, content: ClipboardContent) -> Result<()> {
        let prepared = PreparedContent::prepare(content).await?;
        self.send(Command::LocalClipboard { prepared }).await
    }

    /// Send the candidate held back while auto-send is off
    pub async fn send_pending_clipboard(&self) -> Result<ClipboardEntry> {
        self.request(|respond_to| Command::SendPending { respond_to })
            .await
    }

    pub async fn set_local_clipboard(&self, content: ClipboardContent) -> Result<()> {
        self.request(|respond_to| Command::SetLocalClipboard {
            content,
            respond_to,
        })
        .await
    }

    /// Apply the remote entry held back while auto-receive is off
    pub async fn confirm_pending_clipboard(&self) -> Result<Option<ClipboardEntry>> {
        self.request(|respond_to| Command::ConfirmPending { respond_to })
            .await
    }

    pub async fn get_pending(&self) -> Result<PendingState> {
        self.call(|respond_to| Command::GetPending { respond_to }).await
    }

    /// Newest first
    pub async fn get_history(&self) -> Result<Vec<ClipboardEntry>> {
        self.call(|respond_to| Command::GetHistory { respond_to }).await
    }

    pub async fn copy_history_item(&self, id: Uuid) -> Result<()> {
        self.request(|respond_to| Command::CopyHistoryItem { id, respond_to })
            .await
    }

    pub async fn resend_history_item(&self, id: Uuid) -> Result<ClipboardEntry> {
        self.request(|respond_to| Command::ResendHistoryItem { id, respond_to })
            .await
    }

    /// Delete an entry here and on every trusted peer
    pub async fn delete_history_item(&self, id: Uuid) -> Result<()> {
        self.request(|respond_to| Command::DeleteHistoryItem { id, respond_to })
            .await
    }

    // Files

    /// Fetch one file of a history entry from `peer_id`. Progress and the
    /// result arrive as notifications.
    pub async fn request_file(&self, entry_id: Uuid, file_index: usize, peer_id: &str) -> Result<()> {
        let peer_id = peer_id.to_string();
        self.request(|respond_to| Command::RequestFile {
            entry_id,
            file_index,
            peer_id,
            respond_to,
        })
        .await
    }

    // Settings

    pub async fn get_settings(&self) -> Result<Settings> {
        self.call(|respond_to| Command::GetSettings { respond_to }).await
    }

    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        self.request(|respond_to| Command::SaveSettings {
            settings,
            respond_to,
        })
        .await
    }

    /// Stop every task. Further calls fail with `ServiceStopped`.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|respond_to| Command::Shutdown { respond_to }).await
    }
}
