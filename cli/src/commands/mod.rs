//! CLI command implementations.

mod info;
mod leave;
mod run;

use std::sync::Arc;

use clusterclip_core::{ClusterService, Config, MemoryClipboard, ServiceHandle};

pub use info::show_info;
pub use leave::leave;
pub use run::run_service;

/// A short-lived service for one-off commands: no discovery, no clipboard,
/// any free port.
async fn offline_service(mut config: Config) -> anyhow::Result<ServiceHandle> {
    config.port = 0;
    config.enable_discovery = false;
    config.monitor_clipboard = false;

    let (handle, _notifications) = ClusterService::start(config, Arc::new(MemoryClipboard::new())).await?;
    Ok(handle)
}
