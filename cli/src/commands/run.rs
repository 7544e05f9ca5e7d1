//! Run command implementation.

use std::sync::Arc;

use clusterclip_core::clipboard::EntryOrigin;
use clusterclip_core::{
    ArboardClipboard, ClusterService, Config, JoinInvite, Notification, NotificationSettings,
};

use crate::ui::{print_banner, print_status};

/// Run the clipboard service until Ctrl+C.
pub async fn run_service(config: Config, join: Option<String>, peers: Vec<String>) -> anyhow::Result<()> {
    let invite = join.as_deref().map(JoinInvite::from_url).transpose()?;

    print_banner();
    let (handle, mut notifications) = ClusterService::start(config, Arc::new(ArboardClipboard)).await?;
    print_status(&handle.status().await?);

    for input in &peers {
        match handle.add_manual_peer(input).await {
            Ok(found) if found.is_empty() => println!("\x1b[2mNo device answered at {}\x1b[0m", input),
            Ok(found) => {
                for peer in found {
                    println!("\x1b[1;32m⬤\x1b[0m Added \x1b[1m{}\x1b[0m at {}", peer.hostname, peer.address);
                }
            }
            Err(e) => eprintln!("\x1b[1;31m✗\x1b[0m Could not add {}: {}", input, e),
        }
    }

    if let Some(invite) = invite {
        println!("Joining \x1b[1m{}\x1b[0m via {}...", invite.network_name, invite.address());
        match handle.join(&invite).await {
            Ok(peer) => println!("\x1b[1;32m✓\x1b[0m Joined through \x1b[1m{}\x1b[0m", peer.hostname),
            Err(e) => eprintln!("\x1b[1;31m✗\x1b[0m Join failed: {}", e),
        }
    }

    println!("\x1b[1;32m✓\x1b[0m Listening for devices and clipboard changes...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    let mut toggles = handle.get_settings().await?.notifications;
    loop {
        tokio::select! {
            Some(notification) = notifications.recv() => {
                if let Notification::SettingsChanged { settings } = &notification {
                    toggles = settings.notifications.clone();
                }
                print_notification(&notification, &toggles);
            }
            _ = rx.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Print a notification the user asked to see.
fn print_notification(notification: &Notification, show: &NotificationSettings) {
    match notification {
        Notification::PeerUpdate { peer } => {
            if peer.online && show.device_join {
                let trust = if peer.is_trusted { "" } else { " \x1b[2m(not paired)\x1b[0m" };
                println!("\x1b[1;32m⬤\x1b[0m {} online{}", peer.hostname, trust);
            } else if !peer.online && show.device_leave {
                println!("\x1b[1;31m⬤\x1b[0m {} offline", peer.hostname);
            }
        }
        Notification::PeerRemove { peer_id } if show.device_leave => {
            println!("\x1b[1;31m⬤\x1b[0m Removed {}", peer_id);
        }
        Notification::ClipboardChange { entry } => match entry.origin {
            EntryOrigin::Local if show.data_sent => {
                println!("\x1b[1;34m📤\x1b[0m Sent: \"{}\"", entry.preview());
            }
            EntryOrigin::Remote if show.data_received => {
                println!(
                    "\x1b[1;34m📋\x1b[0m From {}: \"{}\"",
                    entry.sender_hostname,
                    entry.preview()
                );
            }
            _ => {}
        },
        Notification::ClipboardPending { entry } => {
            println!(
                "\x1b[1;35m⏸\x1b[0m From {} (waiting for confirmation): \"{}\"",
                entry.sender_hostname,
                entry.preview()
            );
        }
        Notification::ClipboardMonitorUpdate { pending: Some(_) } => {
            println!("\x1b[1;35m⏸\x1b[0m Local copy held back (auto-send is off)");
        }
        Notification::FileReceived { path, .. } if show.data_received => {
            println!("\x1b[1;34m📁\x1b[0m Saved {}", path.display());
        }
        Notification::FileFailed { reason, .. } => {
            eprintln!("\x1b[1;31m✗\x1b[0m File transfer failed: {}", reason);
        }
        Notification::FilesAvailable { total_size, .. } if show.large_files => {
            println!(
                "\x1b[1;33m📦\x1b[0m {} bytes of files available, too large to fetch automatically",
                total_size
            );
        }
        Notification::NetworkUpdate { network_name } => {
            println!("\x1b[1;36m◆\x1b[0m Network is now \x1b[1m{}\x1b[0m", network_name);
        }
        Notification::NetworkReset => {
            println!("\x1b[1;33m◆\x1b[0m This device was reset to a network of its own");
        }
        Notification::PairingFailed { peer_id, reason } => {
            eprintln!("\x1b[1;31m✗\x1b[0m Pairing with {} failed: {}", peer_id, reason);
        }
        other => tracing::trace!("not shown: {}", other.name()),
    }
}
