pub mod config;
pub mod engine;
pub mod error;
pub mod matchmaker;
pub mod model;
pub mod peer;
pub mod relay;
pub mod server;
pub mod signaling;
pub mod transport;

use std::env;

use anyhow::Result;
use tracing::{error, info};

use crate::config::{PeerConfig, ServerConfig};

mod util;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let rest = args.get(2..).unwrap_or_default();

    match args.get(1).map(String::as_str) {
        Some("server") => {
            util::init_log();
            info!("Starting signaling server...");
            server::run(ServerConfig::from_args(rest)?).await
        }
        Some("peer") => {
            util::init_log();
            info!("Starting WebRTC peer...");
            match peer::run(PeerConfig::from_args(rest)).await {
                Ok(_) => info!("Peer completed successfully"),
                Err(e) => error!("Peer error:\n{:?}", e),
            }
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("RPS Relay");
    println!("Usage:");
    println!("  cargo run server [LISTEN_ADDR]  - Start the signaling relay");
    println!("  cargo run peer [WS_URL] [MOVE]  - Join a game as a native peer");
    println!();
    println!(
        "LISTEN_ADDR defaults to ${} or {}.",
        config::LISTEN_ENV,
        config::DEFAULT_LISTEN
    );
    println!(
        "WS_URL defaults to {}, MOVE to {}.",
        config::DEFAULT_SERVER_URL,
        config::DEFAULT_MOVE
    );
}
