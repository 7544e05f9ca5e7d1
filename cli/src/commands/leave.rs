//! Leave command implementation.

use clusterclip_core::Config;

use super::offline_service;

/// Reset to a fresh network of one.
pub async fn leave(config: Config) -> anyhow::Result<()> {
    let handle = offline_service(config).await?;
    let before = handle.get_network_name().await?;

    handle.leave_network().await?;
    let status = handle.status().await?;
    handle.shutdown().await?;

    println!("\x1b[1;33m✓\x1b[0m Left \x1b[1m{}\x1b[0m", before);
    println!("  New network: \x1b[1m{}\x1b[0m", status.network_name);
    println!("  PIN:         \x1b[1m{}\x1b[0m", status.network_pin);
    Ok(())
}
