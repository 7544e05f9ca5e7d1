//! Info command implementation.

use clusterclip_core::discovery::get_local_ips;
use clusterclip_core::{Config, JoinInvite};

use super::offline_service;
use crate::ui::{print_qr_code, print_status};

/// Display device and network information.
pub async fn show_info(config: Config) -> anyhow::Result<()> {
    let port = config.port;
    let handle = offline_service(config).await?;
    let status = handle.status().await?;
    let peers = handle.get_known_peers().await?;
    handle.shutdown().await?;

    print_status(&status);
    println!("\x1b[1mPort:\x1b[0m        {}", port);

    let ips = get_local_ips();
    println!("\n\x1b[1mLocal IPs:\x1b[0m");
    for ip in &ips {
        println!("  • {}", ip);
    }

    if !peers.is_empty() {
        println!("\n\x1b[1mKnown peers:\x1b[0m");
        for peer in &peers {
            let mark = if peer.is_trusted { "trusted" } else { "manual" };
            println!("  • {} ({}) {} [{}]", peer.hostname, peer.id, peer.address, mark);
        }
    }

    if let Some(host) = ips.into_iter().find(|ip| ip.is_ipv4()) {
        let invite = JoinInvite {
            host,
            port,
            network_name: status.network_name,
            pin: status.network_pin,
        };
        let url = invite.to_url();

        println!("\n\x1b[1;33mScan to join, or run `clusterclip run --join <url>`:\x1b[0m\n");
        print_qr_code(&url);
        println!("\n\x1b[2m{}\x1b[0m", url);
    }
    println!();

    Ok(())
}
