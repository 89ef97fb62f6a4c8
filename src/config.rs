//! Command-line configuration for the two sub-commands.

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const LISTEN_ENV: &str = "RPS_LISTEN";
pub const SIGNALING_PATH: &str = "/ws";
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_MOVE: &str = "rock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub path: String,
}

impl ServerConfig {
    /// `server [LISTEN_ADDR]`, falling back to `$RPS_LISTEN`, then the default.
    pub fn from_args(args: &[String]) -> Result<ServerConfig> {
        Self::resolve(args.first().map(String::as_str), env::var(LISTEN_ENV).ok())
    }

    fn resolve(arg: Option<&str>, env_value: Option<String>) -> Result<ServerConfig> {
        let raw = arg
            .map(str::to_string)
            .or(env_value)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

        let listen = raw
            .parse()
            .with_context(|| format!("invalid listen address {raw:?}"))?;

        Ok(ServerConfig {
            listen,
            path: SIGNALING_PATH.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub url: String,
    /// What the peer sends once its data channel is open.
    pub play: String,
}

impl PeerConfig {
    /// `peer [WS_URL] [MOVE]`
    pub fn from_args(args: &[String]) -> PeerConfig {
        PeerConfig {
            url: args
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            play: args.get(1).cloned().unwrap_or_else(|| DEFAULT_MOVE.to_string()),
        }
    }
}
