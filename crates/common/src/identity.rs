//! Process identity used as the lock token value.
//!
//! Computed once at start-up and handed to the engine, so every lock taken by
//! one engine instance carries the same token.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// `<local-ip>:<pid>:<instance-id>`, generating a random instance id when none is given.
    pub fn detect(instance_id: Option<&str>) -> Self {
        let instance = instance_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let identity = Self(format!(
            "{}:{}:{}",
            local_ip(),
            std::process::id(),
            instance
        ));

        tracing::debug!(identity = %identity.0, "Resolved node identity");
        identity
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound IPv4 address of this host, or loopback when none can be resolved.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// address would route to a public destination.
fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
