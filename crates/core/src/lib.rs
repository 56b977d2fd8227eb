//! Cyxchat Core
//!
//! Shared building blocks for the messaging engine: fixed-width
//! identifiers, the wire header and message-type registry, the error
//! taxonomy, byte-exact codec helpers, and the transport traits the
//! engine is driven through.

pub mod error;
pub mod link;
pub mod proto;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{CyxError, Result};
pub use proto::{HeaderFlags, MessageHeader, COMPACT_HEADER_LEN, WIRE_VERSION};
pub use transport::{NatStatus, NatType, OnionTransport, RawEvent, RawTransport};
pub use types::{FileId, GroupId, MailId, MsgId, NodeId, PublicKey, Signature};
