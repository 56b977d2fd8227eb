//! Cyxchat Crypto
//!
//! Identity keys and the primitives the engine leans on: Ed25519
//! signing, X25519 key agreement, BLAKE2b digests, and ECDH +
//! ChaCha20-Poly1305 sealing (used by loopback transports; the
//! production onion transport does its own encryption).

mod encrypt;
mod hash;
mod keys;
mod sign;

pub use encrypt::{open_from_sender, seal_for_recipient, EncryptError};
pub use hash::{hash32, hash40, safety_number};
pub use keys::{EncryptionKeypair, Identity, SigningKeypair};
pub use sign::{sign_data, verify_signature};
