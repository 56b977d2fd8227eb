use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::hash::hash32;

#[derive(Error, Debug)]
pub enum EncryptError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid key")]
    InvalidKey,
    #[error("ciphertext too short")]
    CiphertextTooShort,
}

/// Seal data for a recipient using ECDH + ChaCha20-Poly1305.
///
/// 1. X25519 Diffie-Hellman to derive the shared secret
/// 2. BLAKE2b of the shared secret as the symmetric key
/// 3. ChaCha20-Poly1305 with a random nonce prepended to the ciphertext
pub fn seal_for_recipient(
    recipient_pubkey: &[u8; 32],
    sender_secret: &[u8; 32],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptError> {
    let sender_secret = StaticSecret::from(*sender_secret);
    let recipient_public = PublicKey::from(*recipient_pubkey);
    let shared_secret = sender_secret.diffie_hellman(&recipient_public);

    let symmetric_key = hash32(shared_secret.as_bytes());

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher =
        ChaCha20Poly1305::new_from_slice(&symmetric_key).map_err(|_| EncryptError::InvalidKey)?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open data sealed by [`seal_for_recipient`]
pub fn open_from_sender(
    sender_pubkey: &[u8; 32],
    recipient_secret: &[u8; 32],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptError> {
    if ciphertext.len() < 12 {
        return Err(EncryptError::CiphertextTooShort);
    }

    let recipient_secret = StaticSecret::from(*recipient_secret);
    let sender_public = PublicKey::from(*sender_pubkey);
    let shared_secret = recipient_secret.diffie_hellman(&sender_public);

    let symmetric_key = hash32(shared_secret.as_bytes());

    let nonce = Nonce::from_slice(&ciphertext[..12]);
    let ciphertext = &ciphertext[12..];

    let cipher =
        ChaCha20Poly1305::new_from_slice(&symmetric_key).map_err(|_| EncryptError::InvalidKey)?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| EncryptError::DecryptionFailed)
}
