use std::net::IpAddr;

use anyhow::{anyhow, Result};
use str0m::Candidate;
use systemstat::{Platform, System};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Iterates over all network interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses. The first routable interface is
/// returned.
pub fn select_host_address() -> Result<IpAddr> {
    let system = System::new();
    let networks = system.networks()?;

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                    return Ok(IpAddr::V4(v));
                }
            }
        }
    }

    Err(anyhow!("found no usable network interface"))
}

/// Candidate lines in the form browsers exchange (`candidate:...`).
pub fn candidate_line(candidate: &Candidate) -> String {
    let line = candidate.to_sdp_string();
    line.strip_prefix("a=").unwrap_or(&line).to_string()
}

/// Parse a trickled candidate line, tolerating an `a=` prefix.
pub fn parse_candidate(line: &str) -> Result<Candidate> {
    let line = line.trim();
    let line = line.strip_prefix("a=").unwrap_or(line);
    Candidate::from_sdp_string(line).map_err(|e| anyhow!("bad candidate {:?}: {:?}", line, e))
}
