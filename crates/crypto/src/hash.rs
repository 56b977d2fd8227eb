use blake2::{Blake2b512, Digest};

use cyxchat_core::PublicKey;

/// BLAKE2b digest truncated to 32 bytes (node ids, crypto-name targets)
pub fn hash32(data: &[u8]) -> [u8; 32] {
    let digest = Blake2b512::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// BLAKE2b digest truncated to 5 bytes (crypto-name material: 40 bits,
/// exactly eight base32 characters)
pub fn hash40(data: &[u8]) -> [u8; 5] {
    let digest = Blake2b512::digest(data);
    let mut out = [0u8; 5];
    out.copy_from_slice(&digest[..5]);
    out
}

/// Human-verifiable fingerprint for a pair of public keys: six 5-digit
/// groups derived from the digest of the sorted key concatenation. Both
/// sides compute the same string regardless of argument order.
pub fn safety_number(a: &PublicKey, b: &PublicKey) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(lo);
    input[32..].copy_from_slice(hi);
    let digest = Blake2b512::digest(input);

    let mut groups = Vec::with_capacity(6);
    for chunk in digest.chunks_exact(5).take(6) {
        let mut v: u64 = 0;
        for &byte in chunk {
            v = (v << 8) | byte as u64;
        }
        groups.push(format!("{:05}", v % 100_000));
    }
    groups.join(" ")
}
