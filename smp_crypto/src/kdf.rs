//! Key derivation functions.
//!
//! `hkdf_expand` — HKDF-SHA256, used for session and root key material
//! throughout X3DH and the double ratchet.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be empty (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive 32-byte root key for a DH output.
pub fn derive_root_key(dh_output: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    hkdf_expand(dh_output, Some(b"smp-agent-v1"), info, &mut key)?;
    Ok(key)
}

/// KDF_RK_HE: root key derivation from a DH ratchet step, also producing the
/// header key for the chain this step opens (spec.md §4.4 header
/// encryption). Returns (new_root_key, new_chain_key, new_header_key).
pub fn kdf_rk_he(rk: &[u8; 32], dh_output: &[u8]) -> Result<([u8; 32], [u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(rk), dh_output);
    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    let mut hdk = [0u8; 32];
    hk.expand(b"smp-ratchet-rk", &mut new_rk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"smp-ratchet-ck", &mut ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"smp-ratchet-hk", &mut hdk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok((new_rk, ck, hdk))
}

/// KDF_CK: chain key → (next_chain_key, message_key).
pub fn kdf_ck(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    use hmac::{Hmac, Mac};
    type HmacSha256 = Hmac<Sha256>;

    let mut mac_ck =
        HmacSha256::new_from_slice(ck).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_ck.update(&[0x01]);
    let new_ck: [u8; 32] = mac_ck.finalize().into_bytes().into();

    let mut mac_mk =
        HmacSha256::new_from_slice(ck).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_mk.update(&[0x02]);
    let mk: [u8; 32] = mac_mk.finalize().into_bytes().into();

    Ok((new_ck, mk))
}

/// Derive the two initial ratchet header keys from the X3DH shared secret
/// `SK`: `shared_hka` seeds the initiator's first sending chain (and the
/// responder's first receiving chain), `shared_hkb` seeds the reverse.
pub fn initial_header_keys(shared_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut hka = [0u8; 32];
    let mut hkb = [0u8; 32];
    hkdf_expand(shared_key, None, b"smp-ratchet-hka", &mut hka)?;
    hkdf_expand(shared_key, None, b"smp-ratchet-hkb", &mut hkb)?;
    Ok((hka, hkb))
}
