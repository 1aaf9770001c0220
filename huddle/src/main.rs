mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use huddle_api::settings::{ice_settings, sfu_config};
use huddle_core::{bootstrap::load_config, logging};
use huddle_sfu::{RoomFactory, WebRtcSessionFactory};

use server::HuddleServer;

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Huddle WebRTC room relay", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Huddle server starting...");
    info!(address = %config.http_address(), "HTTP address");

    // 3. Room registry and peer session factory
    let factory = Arc::new(RoomFactory::new(sfu_config(&config)));
    let sessions = Arc::new(WebRtcSessionFactory::new(&ice_settings(&config))?);

    // 4. Serve until shutdown
    HuddleServer::new(config, factory, sessions).start().await
}
