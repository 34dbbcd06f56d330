// dbbackup/src/utils/host.rs
use std::net::{IpAddr, UdpSocket};
use tracing::debug;

pub const UNKNOWN_HOST: &str = "unknown-host";

// Connecting a UDP socket only selects a route; no packet is sent.
const PROBE_ADDR: &str = "8.8.8.8:80";

/// Resolves the identity used in artifact names and storage keys.
///
/// Order: outbound interface IP, then machine hostname, then [`UNKNOWN_HOST`].
/// Called once per run; the result is threaded through naming and key computation.
pub fn resolve_host_id() -> String {
    let resolved = pick_host_id(outbound_ip(), machine_hostname());
    debug!(host_id = %resolved, "Resolved host identity");
    resolved
}

fn pick_host_id(ip: Option<IpAddr>, hostname: Option<String>) -> String {
    if let Some(ip) = ip.filter(|ip| !ip.is_unspecified()) {
        return ip.to_string();
    }
    hostname
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(PROBE_ADDR).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn machine_hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}
