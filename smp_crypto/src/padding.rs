//! Fixed-size padding for ratchet plaintexts (spec.md §4.4/§8).
//!
//! `ratchet::encrypt(msg, pad_len)` always returns a buffer of exactly
//! `1 + full_header_len + auth_tag_size + pad_len` bytes regardless of the
//! input length, so an observer of ciphertext sizes alone learns nothing
//! about the plaintext length beyond the caller-chosen bucket. Padding is
//! applied before the AEAD step: a 2-byte big-endian length prefix records
//! the real plaintext length, and the remainder up to `pad_len` is zero
//! filled.

use crate::error::CryptoError;

/// Poly1305/GCM authentication tag length, in bytes.
pub const AUTH_TAG_SIZE: usize = 16;

/// Serialized size of a ratchet header's plaintext fields:
/// `dh_public (32) || pn (4, u32 BE) || n (4, u32 BE)`.
pub const HEADER_PLAINTEXT_LEN: usize = 40;

/// Size of an encrypted ratchet header on the wire:
/// `nonce (24) || header_plaintext (40) || tag (16)`.
pub const ENC_HEADER_LEN: usize = 24 + HEADER_PLAINTEXT_LEN + AUTH_TAG_SIZE;

const LEN_PREFIX: usize = 2;

/// Pad `plaintext` to exactly `pad_len` bytes: `[u16 BE real_len][plaintext][zeros]`.
pub fn pad(plaintext: &[u8], pad_len: usize) -> Result<Vec<u8>, CryptoError> {
    let needed = plaintext.len() + LEN_PREFIX;
    if needed > pad_len {
        return Err(CryptoError::InvalidKey(format!(
            "plaintext of {} bytes does not fit in pad_len {}",
            plaintext.len(),
            pad_len
        )));
    }
    if plaintext.len() > u16::MAX as usize {
        return Err(CryptoError::InvalidKey("plaintext too large to pad".into()));
    }
    let mut out = vec![0u8; pad_len];
    out[..LEN_PREFIX].copy_from_slice(&(plaintext.len() as u16).to_be_bytes());
    out[LEN_PREFIX..LEN_PREFIX + plaintext.len()].copy_from_slice(plaintext);
    Ok(out)
}

/// Recover the original plaintext from a padded buffer produced by [`pad`].
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if padded.len() < LEN_PREFIX {
        return Err(CryptoError::InvalidKey("padded buffer too short".into()));
    }
    let real_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    let end = LEN_PREFIX + real_len;
    if end > padded.len() {
        return Err(CryptoError::InvalidKey("padding length prefix out of range".into()));
    }
    Ok(padded[LEN_PREFIX..end].to_vec())
}

/// Total wire size of a `ratchet::encrypt(msg, pad_len)` output.
pub fn encrypted_message_len(pad_len: usize) -> usize {
    1 + ENC_HEADER_LEN + AUTH_TAG_SIZE + pad_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_unpad_roundtrip() {
        let padded = pad(b"hello", 64).unwrap();
        assert_eq!(padded.len(), 64);
        assert_eq!(unpad(&padded).unwrap(), b"hello");
    }

    #[test]
    fn pad_rejects_oversize_plaintext() {
        assert!(pad(&[0u8; 100], 64).is_err());
    }

    #[test]
    fn unpad_rejects_truncated_buffer() {
        assert!(unpad(&[0u8]).is_err());
    }

    #[test]
    fn encrypted_message_len_matches_formula() {
        // 1 + full_header_len + auth_tag_size + L
        let l = 256;
        assert_eq!(
            encrypted_message_len(l),
            1 + ENC_HEADER_LEN + AUTH_TAG_SIZE + l
        );
    }
}
