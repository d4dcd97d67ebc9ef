//! Best-effort server identity
//!
//! Detected once at startup and passed into every component that stamps or
//! matches envelopes. Nothing in the relay reads the network configuration
//! after construction.

use if_addrs::{get_if_addrs, IfAddr};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_ip: String,
    pub hostname: String,
}

impl ServerIdentity {
    pub fn new(server_ip: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            server_ip: server_ip.into(),
            hostname: hostname.into(),
        }
    }

    /// First non-loopback IPv4 address plus the OS hostname. Falls back to
    /// loopback when no interface qualifies - identity is advisory, not
    /// load-bearing for delivery.
    pub fn detect() -> Self {
        let server_ip = primary_ipv4().unwrap_or_else(|| {
            warn!("no non-loopback IPv4 interface found, using 127.0.0.1");
            "127.0.0.1".to_string()
        });
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        debug!(%server_ip, %hostname, "server identity detected");
        Self { server_ip, hostname }
    }

    /// Whether a node-scoped command target addresses this process. Targets
    /// may name the node by address or by hostname.
    pub fn matches(&self, target: &str) -> bool {
        target == self.server_ip || target == self.hostname
    }
}

fn primary_ipv4() -> Option<String> {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            warn!(error = %err, "failed to enumerate network interfaces");
            return None;
        }
    };

    interfaces.into_iter().find_map(|interface| {
        if interface.is_loopback() {
            return None;
        }
        match interface.addr {
            IfAddr::V4(v4) => Some(v4.ip.to_string()),
            IfAddr::V6(_) => None,
        }
    })
}
