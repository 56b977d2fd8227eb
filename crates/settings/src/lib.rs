//! Cyxchat Settings
//!
//! Engine tunables with serde defaults, JSON round-tripping, and the
//! `CYXCHAT_RELAY` environment hook for relay server lists.

mod config;

pub use config::{parse_addr, OverflowPolicy, Settings, RELAY_ENV_VAR};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
