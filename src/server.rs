//! Signaling listener
//!
//! Accepts TCP connections, upgrades them to websockets and runs one
//! signaling loop per connection on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::{driver::RtcDriver, EngineFactory};
use crate::matchmaker::Matchmaker;
use crate::signaling::run_session;
use crate::transport;
use crate::util::select_host_address;

pub async fn run(config: ServerConfig) -> Result<()> {
    let host_addr = select_host_address()?;
    let driver = RtcDriver::start(host_addr)?;
    info!("Peer connections use UDP {}", driver.local_addr());

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(
        "Signaling server listening on ws://{}{}",
        listener.local_addr()?,
        config.path
    );

    serve(listener, &config.path, Arc::new(driver), Matchmaker::new()).await
}

/// Accept connections forever. Per-connection failures never stop the loop.
pub async fn serve(
    listener: TcpListener,
    path: &str,
    factory: Arc<dyn EngineFactory>,
    matchmaker: Arc<Matchmaker>,
) -> Result<()> {
    let path: Arc<str> = Arc::from(path);

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        tokio::spawn(handle_connection(
            stream,
            remote,
            path.clone(),
            factory.clone(),
            matchmaker.clone(),
        ));
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    remote: SocketAddr,
    path: Arc<str>,
    factory: Arc<dyn EngineFactory>,
    matchmaker: Arc<Matchmaker>,
) {
    let (source, sink) = match transport::upgrade(stream, &path).await {
        Ok(halves) => halves,
        Err(e) => {
            warn!("Dropping {}: {}", remote, e);
            return;
        }
    };

    info!("Signaling connection from {}", remote);
    run_session(source, sink, factory, matchmaker).await;
}
