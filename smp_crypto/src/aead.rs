//! Authenticated Encryption with Associated Data.
//!
//! Three AEAD surfaces, matching the roles spec.md §4.4/§4.8 assigns them:
//!
//! - [`encrypt`]/[`decrypt`] — XChaCha20-Poly1305, used by the double
//!   ratchet for per-message encryption (192-bit random nonce, so no
//!   nonce-reuse bookkeeping is needed across messages).
//! - [`gcm_encrypt`]/[`gcm_decrypt`] — AES-256-GCM, used on the wire
//!   transmission authenticator path where the corpus expects AES-GCM
//!   rather than ChaCha.
//! - [`queue_box_encrypt`]/[`queue_box_open`] — an anonymous DH envelope
//!   (ephemeral X25519 keypair + XChaCha20-Poly1305, the `crypto_box`
//!   idiom) used to encrypt the per-queue client message envelope with
//!   the recipient's `e2e_dh_secret` public half.
//!
//! Ciphertext wire format for the symmetric-key variants:
//!   `[ nonce | ciphertext + tag ]`

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use aes_gcm::{Aes256Gcm, Nonce as GcmNonce};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Encrypt `plaintext` with a 32-byte key, prepending a random 24-byte nonce.
/// `aad` — additional associated data (authenticated but not encrypted).
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < 24 {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(24);
    let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(nonce, chacha20poly1305::aead::Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt with AES-256-GCM (12-byte random nonce). Used on the transport
/// authenticator path where a symmetric authenticator is derived from a DH
/// secret (see `smp_proto::codec`).
pub fn gcm_encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    use aes_gcm::aead::{Aead as GcmAead, AeadCore as GcmAeadCore, KeyInit as GcmKeyInit, OsRng as GcmOsRng};
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut GcmOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, aes_gcm::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt AES-256-GCM wire-format bytes (nonce || ciphertext+tag).
pub fn gcm_decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    use aes_gcm::aead::{Aead as GcmAead, KeyInit as GcmKeyInit};
    if data.len() < 12 {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(12);
    let nonce = GcmNonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let plaintext = cipher
        .decrypt(nonce, aes_gcm::aead::Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt a single ratchet message under its one-time-use message key `mk`.
///
/// Unlike [`encrypt`], the nonce is fixed at all-zero: `mk` is derived fresh
/// per message by the chain KDF and is never reused, so a random nonce buys
/// nothing and would cost 24 bytes against the fixed padded-size invariant
/// (spec.md §8). Output is exactly `plaintext.len() + 16` bytes.
pub fn ratchet_encrypt(mk: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(mk).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = chacha20poly1305::XNonce::default();
    cipher
        .encrypt(&nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)
}

/// Decrypt a [`ratchet_encrypt`]-produced ciphertext.
pub fn ratchet_decrypt(mk: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(mk).map_err(|_| CryptoError::AeadDecrypt)?;
    let nonce = chacha20poly1305::XNonce::default();
    let plaintext = cipher
        .decrypt(&nonce, chacha20poly1305::aead::Payload { msg: data, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt a 32-byte key with another 32-byte wrapping key (key transport).
pub fn wrap_key(wrap_key: &[u8; 32], key_to_wrap: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    encrypt(wrap_key, key_to_wrap, b"smp-key-wrap")
}

/// Decrypt a wrapped key.
pub fn unwrap_key(wrap_key: &[u8; 32], wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
    let plaintext = decrypt(wrap_key, wrapped, b"smp-key-wrap")?;
    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKey("Unwrapped key wrong length".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

/// Anonymous DH envelope ("crypto_box" idiom): wire format is
/// `[ ephemeral_pub (32) | xchacha20poly1305(nonce || ct) ]`.
///
/// Used to seal the `ClientMsgEnvelope` (spec.md §4.8) under the
/// recipient's queue `e2e_dh_secret` public key: the sender generates a
/// fresh ephemeral X25519 keypair per message, DH's it against the
/// recipient's public key, and derives an AEAD key via HKDF from the DH
/// output. No per-queue long-term symmetric key is ever transmitted.
pub fn queue_box_encrypt(
    recipient_pub: &X25519Public,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let eph_secret = StaticSecret::random_from_rng(OsRng);
    let eph_pub = X25519Public::from(&eph_secret);
    let dh = eph_secret.diffie_hellman(recipient_pub);

    let mut key = [0u8; 32];
    crate::kdf::hkdf_expand(dh.as_bytes(), None, b"smp-queue-box", &mut key)?;

    let body = encrypt(&key, plaintext, aad)?;
    let mut out = Vec::with_capacity(32 + body.len());
    out.extend_from_slice(eph_pub.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open a `queue_box_encrypt` envelope using the recipient's DH secret.
pub fn queue_box_open(
    recipient_secret: &StaticSecret,
    data: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < 32 {
        return Err(CryptoError::AeadDecrypt);
    }
    let (eph_pub_bytes, body) = data.split_at(32);
    let eph_pub = X25519Public::from(
        <[u8; 32]>::try_from(eph_pub_bytes).map_err(|_| CryptoError::AeadDecrypt)?,
    );
    let dh = recipient_secret.diffie_hellman(&eph_pub);

    let mut key = [0u8; 32];
    crate::kdf::hkdf_expand(dh.as_bytes(), None, b"smp-queue-box", &mut key)?;

    decrypt(&key, body, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xchacha_roundtrip() {
        let key = [7u8; 32];
        let ct = encrypt(&key, b"hello", b"aad").unwrap();
        let pt = decrypt(&key, &ct, b"aad").unwrap();
        assert_eq!(&*pt, b"hello");
    }

    #[test]
    fn gcm_roundtrip() {
        let key = [9u8; 32];
        let ct = gcm_encrypt(&key, b"hello gcm", b"aad").unwrap();
        let pt = gcm_decrypt(&key, &ct, b"aad").unwrap();
        assert_eq!(&*pt, b"hello gcm");
    }

    #[test]
    fn gcm_rejects_tampered_aad() {
        let key = [9u8; 32];
        let ct = gcm_encrypt(&key, b"hello gcm", b"aad").unwrap();
        assert!(gcm_decrypt(&key, &ct, b"wrong-aad").is_err());
    }

    #[test]
    fn queue_box_roundtrip() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let sealed = queue_box_encrypt(&public, b"confirmation", b"").unwrap();
        let opened = queue_box_open(&secret, &sealed, b"").unwrap();
        assert_eq!(&*opened, b"confirmation");
    }

    #[test]
    fn ratchet_encrypt_has_no_nonce_overhead() {
        let mk = [3u8; 32];
        let ct = ratchet_encrypt(&mk, b"hi", b"hdr").unwrap();
        assert_eq!(ct.len(), 2 + 16);
        let pt = ratchet_decrypt(&mk, &ct, b"hdr").unwrap();
        assert_eq!(&*pt, b"hi");
    }

    #[test]
    fn queue_box_rejects_wrong_key() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let other = StaticSecret::random_from_rng(OsRng);
        let sealed = queue_box_encrypt(&public, b"confirmation", b"").unwrap();
        assert!(queue_box_open(&other, &sealed, b"").is_err());
    }
}
