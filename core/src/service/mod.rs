//! High-level cluster service that coordinates all components

mod actor;
mod handle;
mod inbound;
pub mod notify;

pub use handle::ServiceHandle;
pub use notify::{Notification, Notifier};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::clipboard::{start_monitor, ClipboardBackend, History, SyncEngine};
use crate::discovery::{DiscoveryEvent, DiscoveryService};
use crate::identity::{ClusterMode, IdentityStore};
use crate::pairing::PairingRegistry;
use crate::protocol::constants::NOTIFICATION_CAPACITY;
use crate::settings::Settings;
use crate::sync::{Outbox, SyncServer};
use crate::transfer::{Downloads, OfferedFiles};
use crate::trust::TrustStore;
use crate::{Config, Result};

use actor::{Actor, Command};

pub(crate) const SETTINGS_FILE: &str = "settings.json";
pub(crate) const KNOWN_PEERS_FILE: &str = "known_peers.json";

/// Snapshot of this device and its network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub device_id: String,
    pub hostname: String,
    pub platform: String,
    pub network_name: String,
    pub network_pin: String,
    pub mode: ClusterMode,
    pub key_fingerprint: String,
    pub port: u16,
}

/// Entry point: wires the stores, the listener, discovery and the clipboard
/// monitor to one coordinating task.
pub struct ClusterService;

impl ClusterService {
    /// Start the service. Notifications arrive on the returned receiver
    /// until the service is shut down.
    pub async fn start(
        config: Config,
        clipboard: Arc<dyn ClipboardBackend>,
    ) -> Result<(ServiceHandle, mpsc::Receiver<Notification>)> {
        std::fs::create_dir_all(&config.data_dir)?;

        let settings = Settings::load(&config.data_dir.join(SETTINGS_FILE));
        let base_hostname = match &config.device_name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "clusterclip".to_string()),
        };
        let identity = IdentityStore::open(&config.data_dir, settings.device_name(&base_hostname))?;
        let trust = TrustStore::open(&config.data_dir.join(KNOWN_PEERS_FILE));

        let server = SyncServer::bind_or_fallback(config.port).await?;
        let port = server.port();

        let config = Arc::new(config);
        let (notifier, notifications) = Notifier::channel(NOTIFICATION_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(128);
        let handle = ServiceHandle::new(commands_tx.clone(), config.clone());

        let (outbox, outbox_task) = Outbox::spawn(config.request_timeout);
        let mut tasks = vec![outbox_task];

        let inbound_handle = handle.clone();
        let server = server.start(move |conn| inbound::serve(conn, inbound_handle.clone()));

        let discovery = if config.enable_discovery {
            match DiscoveryService::new() {
                Ok(discovery) => {
                    let mut events = discovery.browse()?;
                    let commands = commands_tx.clone();
                    tasks.push(tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            let command = match event {
                                DiscoveryEvent::Found(observation) => Command::Discovered(observation),
                                DiscoveryEvent::Lost(peer_id) => Command::Lost(peer_id),
                            };
                            if commands.send(command).await.is_err() {
                                break;
                            }
                        }
                    }));
                    Some(discovery)
                }
                Err(e) => {
                    tracing::warn!("mDNS unavailable, manual peers only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut engine = SyncEngine::new();
        if config.monitor_clipboard {
            // what is on the clipboard at launch is not a new copy
            let seed = clipboard.read().unwrap_or_else(|e| {
                tracing::warn!("clipboard read error: {}", e);
                None
            });
            if let Some(content) = &seed {
                engine.note_local_write(&content.signature());
            }

            let (mut changes, monitor_task) =
                start_monitor(clipboard.clone(), config.clipboard_poll_interval, seed.as_ref());
            tasks.push(monitor_task);

            let monitor_handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(content) = changes.recv().await {
                    if let Err(e) = monitor_handle.observe_local_clipboard(content).await {
                        if matches!(e, crate::Error::ServiceStopped) {
                            break;
                        }
                        tracing::warn!("skipping clipboard change: {}", e);
                    }
                }
            }));
        }

        tracing::info!(
            "{} ({}) listening on port {}, network {}",
            identity.hostname(),
            identity.device_id(),
            port,
            identity.cluster().network_name
        );

        let actor = Actor {
            port,
            base_hostname,
            identity,
            trust,
            engine,
            history: History::new(settings.history_limit),
            offered: OfferedFiles::new(settings.history_limit),
            downloads: Downloads::new(),
            pairing: PairingRegistry::new(),
            settings,
            clipboard,
            notifier,
            outbox,
            server,
            discovery,
            tasks,
            commands: commands_tx.downgrade(),
            config,
        };
        tokio::spawn(actor.run(commands_rx));

        Ok((handle, notifications))
    }
}
