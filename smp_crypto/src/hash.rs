//! BLAKE3-based hash utilities.
//!
//! - Deterministic message IDs
//! - `content_hash` / chain-link computation backing the
//!   previous-message-hash integrity invariant (spec §3, §8)

pub fn hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Keyed hash — used for MACs where a key context differentiates domains.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

/// Content hash of a message body, as embedded in the *next* message's
/// `previousMsgHash` field (spec §8 testable property).
pub fn content_hash(body: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"smp-content-hash-v1\x00");
    hasher.update(body);
    hasher.finalize().into()
}

/// Derive a deterministic message ID from content and sender/recipient
/// context.
pub fn message_id(sender_id: &str, recipient_id: &str, plaintext: &[u8], ts_nanos: i64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"smp-msg-id-v1\x00");
    hasher.update(sender_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(recipient_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(&ts_nanos.to_le_bytes());
    hasher.update(b"\x00");
    hasher.update(plaintext);
    hex::encode(hasher.finalize().as_bytes())
}

/// Compute a chain link: H(prev_hash || message_id || ciphertext).
///
/// Enables out-of-band auditing that no messages have been dropped.
pub fn chain_link(prev_hash: &[u8; 32], message_id: &str, ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"smp-chain-v1\x00");
    hasher.update(prev_hash);
    hasher.update(message_id.as_bytes());
    hasher.update(ciphertext);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_sensitive() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        let c = content_hash(b"hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
