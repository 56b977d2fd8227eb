//! Status snapshot exported to callers.

use serde::Serialize;

use cyxchat_core::NatType;
use cyxchat_dns::DnsStats;

/// Point-in-time view of the connection manager
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Public address discovered via STUN, when known
    pub public_addr: Option<String>,
    pub nat_type: NatType,
    pub stun_complete: bool,
    /// Whether discovery has surfaced any peer yet
    pub bootstrap_connected: bool,
    /// Directly connected peers
    pub active: usize,
    /// Peers reached through relay circuits
    pub relayed: usize,
    pub dns: DnsStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes() {
        let status = ConnectionStatus {
            public_addr: Some("203.0.113.4:7000".to_string()),
            nat_type: NatType::FullCone,
            stun_complete: true,
            bootstrap_connected: false,
            active: 3,
            relayed: 1,
            dns: DnsStats::default(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"full_cone\""));
        assert!(json.contains("\"active\":3"));
    }
}
