//! Engine configuration.

use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::{Result, SettingsError};

/// Environment variable holding a comma-separated relay server list
pub const RELAY_ENV_VAR: &str = "CYXCHAT_RELAY";

/// Receive-queue overflow policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

/// All engine tunables with their protocol defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Initial peer used for discovery, `"ip:port"`
    #[serde(default)]
    pub bootstrap: Option<String>,

    /// Relay server addresses, `"ip:port"`
    #[serde(default)]
    pub relay_servers: Vec<String>,

    #[serde(default = "default_hole_punch_timeout_ms")]
    pub hole_punch_timeout_ms: u64,

    /// Advisory punch pacing; the transport owns the actual punching
    #[serde(default = "default_hole_punch_attempts")]
    pub hole_punch_attempts: u8,

    #[serde(default = "default_hole_punch_interval_ms")]
    pub hole_punch_interval_ms: u64,

    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    #[serde(default = "default_conn_timeout_ms")]
    pub conn_timeout_ms: u64,

    #[serde(default = "default_stun_interval_ms")]
    pub stun_interval_ms: u64,

    #[serde(default = "default_announce_throttle_ms")]
    pub announce_throttle_ms: u64,

    #[serde(default = "default_frag_timeout_ms")]
    pub frag_timeout_ms: u64,

    #[serde(default = "default_recv_queue_size")]
    pub recv_queue_size: usize,

    #[serde(default)]
    pub recv_overflow: OverflowPolicy,

    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    #[serde(default = "default_max_relay_servers")]
    pub max_relay_servers: usize,

    #[serde(default = "default_max_relay_circuits")]
    pub max_relay_circuits: usize,

    #[serde(default = "default_dns_cache_size")]
    pub dns_cache_size: usize,

    #[serde(default = "default_dns_default_ttl_s")]
    pub dns_default_ttl_s: u32,

    #[serde(default = "default_dns_refresh_interval_s")]
    pub dns_refresh_interval_s: u64,

    #[serde(default = "default_gossip_hops")]
    pub gossip_hops: u8,

    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_hole_punch_timeout_ms() -> u64 {
    5_000
}

fn default_hole_punch_attempts() -> u8 {
    5
}

fn default_hole_punch_interval_ms() -> u64 {
    50
}

fn default_keepalive_ms() -> u64 {
    30_000
}

fn default_conn_timeout_ms() -> u64 {
    90_000
}

fn default_stun_interval_ms() -> u64 {
    60_000
}

fn default_announce_throttle_ms() -> u64 {
    60_000
}

fn default_frag_timeout_ms() -> u64 {
    30_000
}

fn default_recv_queue_size() -> usize {
    32
}

fn default_max_peers() -> usize {
    32
}

fn default_max_relay_servers() -> usize {
    4
}

fn default_max_relay_circuits() -> usize {
    16
}

fn default_dns_cache_size() -> usize {
    128
}

fn default_dns_default_ttl_s() -> u32 {
    3_600
}

fn default_dns_refresh_interval_s() -> u64 {
    1_800
}

fn default_gossip_hops() -> u8 {
    3
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bootstrap: None,
            relay_servers: Vec::new(),
            hole_punch_timeout_ms: default_hole_punch_timeout_ms(),
            hole_punch_attempts: default_hole_punch_attempts(),
            hole_punch_interval_ms: default_hole_punch_interval_ms(),
            keepalive_ms: default_keepalive_ms(),
            conn_timeout_ms: default_conn_timeout_ms(),
            stun_interval_ms: default_stun_interval_ms(),
            announce_throttle_ms: default_announce_throttle_ms(),
            frag_timeout_ms: default_frag_timeout_ms(),
            recv_queue_size: default_recv_queue_size(),
            recv_overflow: OverflowPolicy::default(),
            max_peers: default_max_peers(),
            max_relay_servers: default_max_relay_servers(),
            max_relay_circuits: default_max_relay_circuits(),
            dns_cache_size: default_dns_cache_size(),
            dns_default_ttl_s: default_dns_default_ttl_s(),
            dns_refresh_interval_s: default_dns_refresh_interval_s(),
            gossip_hops: default_gossip_hops(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl Settings {
    /// Defaults plus the `CYXCHAT_RELAY` relay list, when set
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env();
        settings
    }

    /// Fold `CYXCHAT_RELAY` (comma-separated `ip:port`) into this config
    pub fn apply_env(&mut self) {
        if let Ok(list) = std::env::var(RELAY_ENV_VAR) {
            for addr in list.split(',') {
                let addr = addr.trim();
                if !addr.is_empty() && !self.relay_servers.iter().any(|a| a == addr) {
                    self.relay_servers.push(addr.to_string());
                }
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Resolve an `"ip:port"` string, falling back to name resolution for
/// hostnames
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut iter| iter.next())
        .ok_or_else(|| SettingsError::InvalidAddress(addr.to_string()))
}
