//! Clusterclip CLI - serverless clipboard cluster host.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clusterclip_core::protocol::constants::DEFAULT_PORT;
use clusterclip_core::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clusterclip")]
#[command(about = "Share the clipboard across your devices, no server needed", long_about = None)]
struct Cli {
    /// Device name to advertise (defaults to the hostname)
    #[arg(short, long)]
    name: Option<String>,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Where identity, peers and settings are kept
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Disable mDNS; only manually added peers are reachable
    #[arg(long)]
    no_discovery: bool,

    /// Log level for clusterclip itself, e.g. debug
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the clipboard service (default)
    Run {
        /// Join the network of an invite URL
        #[arg(long)]
        join: Option<String>,
        /// Add a peer by address, hostname or CIDR range
        #[arg(long = "peer")]
        peers: Vec<String>,
    },
    /// Show device and network info with the join QR code
    Info,
    /// Leave the current network and start a fresh one
    Leave,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = match &self.data_dir {
            Some(dir) => Config::with_data_dir(dir),
            None => Config::default(),
        };
        config.port = self.port;
        config.device_name = self.name.clone();
        config.enable_discovery = !self.no_discovery;
        config
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::try_new(format!("clusterclip={}", level))?,
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clusterclip=info")),
        };
        Ok(filter.add_directive("mdns_sd=warn".parse()?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(cli.filter()?).init();

    let config = cli.config();
    match cli.command {
        None => commands::run_service(config, None, Vec::new()).await?,
        Some(Commands::Run { join, peers }) => commands::run_service(config, join, peers).await?,
        Some(Commands::Info) => commands::show_info(config).await?,
        Some(Commands::Leave) => commands::leave(config).await?,
    }

    Ok(())
}
