//! Cyxchat Relay
//!
//! Virtual-circuit client for traffic that cannot flow directly. A
//! circuit is a lightweight accounting entry binding a peer to one relay
//! server; the payload riding DATA frames is the end-to-end-encrypted
//! onion frame, so relay servers only ever see envelope fields.

mod client;
pub mod wire;

pub use client::{CircuitInfo, RelayClient, RelayConfig, RelayEvent};
