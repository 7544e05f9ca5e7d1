//! Banner and header printing.

use clusterclip_core::{ClusterMode, NetworkStatus};

/// Print the application banner.
pub fn print_banner() {
    println!("\n\x1b[1;36m╔══════════════════════════════════════╗\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m            \x1b[1mClusterclip\x1b[0m               \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m   Serverless clipboard for your LAN  \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m╚══════════════════════════════════════╝\x1b[0m\n");
}

/// Print this device and the network it belongs to.
pub fn print_status(status: &NetworkStatus) {
    let mode = match status.mode {
        ClusterMode::Auto => "generated",
        ClusterMode::Provisioned => "provisioned",
    };

    println!("\x1b[1mDevice:\x1b[0m      {} ({})", status.hostname, status.platform);
    println!("\x1b[1mID:\x1b[0m          {}", status.device_id);
    println!("\x1b[1mNetwork:\x1b[0m     {} \x1b[2m({})\x1b[0m", status.network_name, mode);
    println!("\x1b[1mPIN:\x1b[0m         {}", status.network_pin);
    println!("\x1b[1mKey:\x1b[0m         {}", status.key_fingerprint);
}
