//! Double Ratchet with DH ratchet steps, header encryption, and an optional
//! hybrid post-quantum KEM (spec.md §4.4, C5).
//!
//! References:
//!   - Signal Double Ratchet spec: <https://signal.org/docs/specifications/doubleratchet/>
//!   - Signal header-encryption extension (the HK/NHK state this module uses)
//!
//! State separation (non-negotiable):
//!   RK        — root key (updated on every DH ratchet step)
//!   CKs/CKr   — sending/receiving chain keys (updated per message)
//!   MK        — message key (derived from CK, used once, then DELETED)
//!   HKs/HKr   — current header keys; NHKs/NHKr — header keys for the next
//!               chain, derived alongside RK/CK at each DH ratchet step so a
//!               message header never leaks the sender's ratchet public key
//!               in cleartext.
//!
//! Forward secrecy: old chain keys, message keys, and header keys are
//! deleted once superseded. Post-compromise security: a new DH ratchet step
//! restores secrecy even after a key compromise.

use std::collections::HashMap;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::padding;

/// Maximum number of skipped message keys retained per session. Bounds
/// memory usage and caps the cost of a malicious large counter jump.
const MAX_SKIP: u64 = 256;

pub mod kem;

/// Plaintext ratchet header, encrypted before transmission (never sent
/// in the clear). Fixed-size: `dh_pub (32) || pn (4, u32 BE) || n (4, u32 BE)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatchetHeader {
    pub dh_pub: [u8; 32],
    pub n: u32,
    pub pn: u32,
}

impl RatchetHeader {
    fn to_bytes(&self) -> [u8; padding::HEADER_PLAINTEXT_LEN] {
        let mut out = [0u8; padding::HEADER_PLAINTEXT_LEN];
        out[..32].copy_from_slice(&self.dh_pub);
        out[32..36].copy_from_slice(&self.pn.to_be_bytes());
        out[36..40].copy_from_slice(&self.n.to_be_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != padding::HEADER_PLAINTEXT_LEN {
            return Err(CryptoError::HeaderDecrypt);
        }
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&bytes[..32]);
        let pn = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
        let n = u32::from_be_bytes(bytes[36..40].try_into().unwrap());
        Ok(Self { dh_pub, n, pn })
    }
}

/// Complete Double Ratchet session state. Persisted via the agent's store
/// between messages.
#[derive(Serialize, Deserialize, Clone)]
pub struct RatchetSession {
    pub session_id: String,
    pub peer_user_id: String,

    root_key: [u8; 32],

    // ── Sending chain ────────────────────────────────────────────────────
    dh_send_secret: [u8; 32],
    #[serde(with = "pub_key_serde")]
    dh_send_pub: X25519Public,
    send_ck: [u8; 32],
    pub send_n: u32,

    // ── Receiving chain ──────────────────────────────────────────────────
    #[serde(with = "option_pub_key_serde")]
    dh_recv_pub: Option<X25519Public>,
    recv_ck: [u8; 32],
    pub recv_n: u32,
    pub prev_send_n: u32,

    // ── Header keys (spec.md §4.4 header encryption) ────────────────────
    send_hk: Option<[u8; 32]>,
    next_send_hk: [u8; 32],
    recv_hk: Option<[u8; 32]>,
    next_recv_hk: [u8; 32],

    // ── Skipped message keys, keyed by (peer dh_pub, message n) ─────────
    skipped_keys: HashMap<([u8; 32], u32), [u8; 32]>,

    // ── Hybrid KEM state (spec.md §4.4.2) ───────────────────────────────
    kem_state: kem::KemState,
}

impl Drop for RatchetSession {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.dh_send_secret.zeroize();
        self.send_ck.zeroize();
        self.recv_ck.zeroize();
        if let Some(k) = self.send_hk.as_mut() {
            k.zeroize();
        }
        self.next_send_hk.zeroize();
        if let Some(k) = self.recv_hk.as_mut() {
            k.zeroize();
        }
        self.next_recv_hk.zeroize();
        for (_, mk) in self.skipped_keys.iter_mut() {
            mk.zeroize();
        }
    }
}

impl RatchetSession {
    /// Create a new session as the INITIATOR (Alice).
    ///
    /// `shared_key` is X3DH's `SK`; `shared_hka`/`shared_hkb` are the two
    /// header keys derived from it via [`crate::kdf::initial_header_keys`].
    /// Alice has Bob's SPK public half (her first "received" DH ratchet
    /// key) and performs her first DH ratchet immediately.
    pub fn init_alice(
        session_id: String,
        peer_user_id: String,
        shared_key: [u8; 32],
        shared_hka: [u8; 32],
        shared_hkb: [u8; 32],
        bob_spk_pub: &X25519Public,
    ) -> Result<Self, CryptoError> {
        let dh_send_secret = StaticSecret::random_from_rng(OsRng);
        let dh_send_pub = X25519Public::from(&dh_send_secret);

        let dh_output = dh_send_secret.diffie_hellman(bob_spk_pub);
        let (new_rk, new_ck, next_send_hk) = crate::kdf::kdf_rk_he(&shared_key, dh_output.as_bytes())?;

        Ok(Self {
            session_id,
            peer_user_id,
            root_key: new_rk,
            dh_send_secret: dh_send_secret.to_bytes(),
            dh_send_pub,
            send_ck: new_ck,
            send_n: 0,
            dh_recv_pub: Some(*bob_spk_pub),
            recv_ck: [0u8; 32],
            recv_n: 0,
            prev_send_n: 0,
            send_hk: Some(shared_hka),
            next_send_hk,
            recv_hk: None,
            next_recv_hk: shared_hkb,
            skipped_keys: HashMap::new(),
            kem_state: kem::KemState::NoKem,
        })
    }

    /// Create a new session as the RESPONDER (Bob). He has not yet performed
    /// a DH ratchet — that happens when Alice's first message arrives.
    pub fn init_bob(
        session_id: String,
        peer_user_id: String,
        shared_key: [u8; 32],
        shared_hka: [u8; 32],
        shared_hkb: [u8; 32],
        my_spk_secret: &StaticSecret,
        my_spk_pub: &X25519Public,
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            session_id,
            peer_user_id,
            root_key: shared_key,
            dh_send_secret: my_spk_secret.to_bytes(),
            dh_send_pub: *my_spk_pub,
            send_ck: [0u8; 32],
            send_n: 0,
            dh_recv_pub: None,
            recv_ck: [0u8; 32],
            recv_n: 0,
            prev_send_n: 0,
            send_hk: None,
            next_send_hk: shared_hkb,
            recv_hk: None,
            next_recv_hk: shared_hka,
            skipped_keys: HashMap::new(),
            kem_state: kem::KemState::NoKem,
        })
    }

    /// Record the hybrid-KEM negotiation outcome for this session. Must be
    /// called at most once per legal transition; see [`kem::KemState::advance`].
    pub fn apply_kem_transition(&mut self, event: kem::KemEvent) -> Result<(), CryptoError> {
        self.kem_state = self.kem_state.advance(event)?;
        Ok(())
    }

    pub fn kem_state(&self) -> &kem::KemState {
        &self.kem_state
    }

    /// Mix a KEM shared secret into the root key (called once, after the
    /// hybrid handshake's encapsulation/decapsulation step completes).
    pub fn mix_kem_secret(&mut self, kem_shared_secret: &[u8]) -> Result<(), CryptoError> {
        self.root_key = crate::kdf::derive_root_key(
            &[self.root_key.as_slice(), kem_shared_secret].concat(),
            b"smp-ratchet-kem-mix",
        )?;
        Ok(())
    }

    // ── Low-level per-message step ───────────────────────────────────────

    /// Advance the sending chain by one message, returning the header and
    /// the message key the caller will encrypt with.
    fn encrypt_step(&mut self) -> Result<(RatchetHeader, [u8; 32]), CryptoError> {
        let (new_ck, mk) = crate::kdf::kdf_ck(&self.send_ck)?;
        self.send_ck = new_ck;
        let header = RatchetHeader {
            dh_pub: *self.dh_send_pub.as_bytes(),
            n: self.send_n,
            pn: self.prev_send_n,
        };
        self.send_n += 1;
        Ok((header, mk))
    }

    /// Encrypt `plaintext`, producing `1 + full_header_len + auth_tag_size +
    /// pad_len` bytes regardless of `plaintext.len()` (spec.md §8).
    pub fn encrypt(&mut self, plaintext: &[u8], pad_len: usize) -> Result<Vec<u8>, CryptoError> {
        let (header, mk) = self.encrypt_step()?;
        let send_hk = self
            .send_hk
            .ok_or_else(|| CryptoError::RatchetStep("no sending header key established".into()))?;

        let enc_header = crate::aead::encrypt(&send_hk, &header.to_bytes(), b"smp-ratchet-header")?;
        debug_assert_eq!(enc_header.len(), padding::ENC_HEADER_LEN);

        let padded = padding::pad(plaintext, pad_len)?;
        let ciphertext = crate::aead::ratchet_encrypt(&mk, &padded, &enc_header)?;

        let mut out = Vec::with_capacity(1 + enc_header.len() + ciphertext.len());
        out.push(1u8); // format version
        out.extend_from_slice(&enc_header);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a buffer produced by [`Self::encrypt`].
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < 1 + padding::ENC_HEADER_LEN {
            return Err(CryptoError::HeaderDecrypt);
        }
        let enc_header = &data[1..1 + padding::ENC_HEADER_LEN];
        let ciphertext = &data[1 + padding::ENC_HEADER_LEN..];

        let (header, used_next) = self.decrypt_header(enc_header)?;
        let mk = self.derive_message_key(&header, used_next)?;

        let padded = crate::aead::ratchet_decrypt(&mk, ciphertext, enc_header)?;
        padding::unpad(&padded)
    }

    /// Try the current header key, then the next one. Returns the decoded
    /// header and whether the *next* key was the one that worked (signalling
    /// an incoming DH ratchet).
    fn decrypt_header(&self, enc_header: &[u8]) -> Result<(RatchetHeader, bool), CryptoError> {
        if let Some(hk) = self.recv_hk {
            if let Ok(plaintext) = crate::aead::decrypt(&hk, enc_header, b"smp-ratchet-header") {
                return Ok((RatchetHeader::from_bytes(&plaintext)?, false));
            }
        }
        if let Ok(plaintext) = crate::aead::decrypt(&self.next_recv_hk, enc_header, b"smp-ratchet-header") {
            return Ok((RatchetHeader::from_bytes(&plaintext)?, true));
        }
        Err(CryptoError::HeaderDecrypt)
    }

    /// Given a successfully decrypted header, derive the message key —
    /// checking skipped keys, performing a DH ratchet step if the header
    /// key indicates a new chain, and skipping any intervening messages.
    fn derive_message_key(&mut self, header: &RatchetHeader, is_new_chain: bool) -> Result<[u8; 32], CryptoError> {
        if let Some(mk) = self.skipped_keys.remove(&(header.dh_pub, header.n)) {
            return Ok(mk);
        }

        if is_new_chain {
            let peer_dh = X25519Public::from(header.dh_pub);
            if self.dh_recv_pub.is_some() {
                self.skip_message_keys(header.pn)?;
            }
            self.dh_ratchet(peer_dh)?;
        }

        if header.n < self.recv_n {
            return Err(CryptoError::Earlier((self.recv_n - header.n) as u64));
        }
        self.skip_message_keys(header.n)?;

        let (new_ck, mk) = crate::kdf::kdf_ck(&self.recv_ck)?;
        self.recv_ck = new_ck;
        self.recv_n += 1;
        Ok(mk)
    }

    /// Perform a full DH ratchet turn: promote the next header keys to
    /// current, derive fresh root/chain/header key material for both the
    /// receiving chain (against `peer_dh`) and a brand new sending chain.
    fn dh_ratchet(&mut self, peer_dh: X25519Public) -> Result<(), CryptoError> {
        self.dh_recv_pub = Some(peer_dh);
        self.recv_hk = Some(self.next_recv_hk);

        let dh_recv_output = StaticSecret::from(self.dh_send_secret).diffie_hellman(&peer_dh);
        let (new_rk, new_recv_ck, new_next_recv_hk) =
            crate::kdf::kdf_rk_he(&self.root_key, dh_recv_output.as_bytes())?;
        self.root_key = new_rk;
        self.recv_ck = new_recv_ck;
        self.next_recv_hk = new_next_recv_hk;
        self.recv_n = 0;

        self.prev_send_n = self.send_n;
        self.send_n = 0;
        self.send_hk = Some(self.next_send_hk);

        let new_dh = StaticSecret::random_from_rng(OsRng);
        self.dh_send_pub = X25519Public::from(&new_dh);
        let dh_send_output = new_dh.diffie_hellman(&peer_dh);
        let (new_rk2, new_send_ck, new_next_send_hk) =
            crate::kdf::kdf_rk_he(&self.root_key, dh_send_output.as_bytes())?;
        self.root_key = new_rk2;
        self.send_ck = new_send_ck;
        self.next_send_hk = new_next_send_hk;
        self.dh_send_secret = new_dh.to_bytes();
        Ok(())
    }

    /// Store skipped message keys from `recv_n` up to (not including) `until`.
    fn skip_message_keys(&mut self, until: u32) -> Result<(), CryptoError> {
        if until < self.recv_n {
            return Ok(());
        }
        let skip_count = (until - self.recv_n) as u64;
        if skip_count > MAX_SKIP {
            return Err(CryptoError::TooManySkipped(skip_count));
        }

        let dh_pub = self.dh_recv_pub.map(|k| *k.as_bytes()).unwrap_or([0u8; 32]);

        while self.recv_n < until {
            let (new_ck, mk) = crate::kdf::kdf_ck(&self.recv_ck)?;
            self.recv_ck = new_ck;
            self.skipped_keys.insert((dh_pub, self.recv_n), mk);
            self.recv_n += 1;
        }

        while self.skipped_keys.len() > MAX_SKIP as usize {
            if let Some(key) = self.skipped_keys.keys().next().copied() {
                if let Some(mut mk) = self.skipped_keys.remove(&key) {
                    mk.zeroize();
                }
            }
        }

        Ok(())
    }

    /// Delete a used skipped message key. Call after successful decryption.
    pub fn delete_skipped_key(&mut self, dh_pub: &[u8; 32], n: u32) {
        if let Some(mut mk) = self.skipped_keys.remove(&(*dh_pub, n)) {
            mk.zeroize();
        }
    }

    /// Our current DH ratchet public key.
    pub fn our_ratchet_pub(&self) -> X25519Public {
        self.dh_send_pub
    }
}

mod pub_key_serde {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use x25519_dalek::PublicKey as X25519Public;

    pub fn serialize<S>(key: &X25519Public, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<X25519Public, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = URL_SAFE_NO_PAD.decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(X25519Public::from(arr))
    }
}

mod option_pub_key_serde {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use x25519_dalek::PublicKey as X25519Public;

    pub fn serialize<S>(key: &Option<X25519Public>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            Some(k) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(k.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<X25519Public>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let bytes = URL_SAFE_NO_PAD.decode(&s).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(X25519Public::from(arr)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_sessions() -> (RatchetSession, RatchetSession) {
        let shared_key = [42u8; 32];
        let (hka, hkb) = crate::kdf::initial_header_keys(&shared_key).unwrap();
        let bob_spk = StaticSecret::random_from_rng(OsRng);
        let bob_spk_pub = X25519Public::from(&bob_spk);

        let alice = RatchetSession::init_alice(
            "sess-1".into(),
            "bob".into(),
            shared_key,
            hka,
            hkb,
            &bob_spk_pub,
        )
        .unwrap();
        let bob = RatchetSession::init_bob(
            "sess-1".into(),
            "alice".into(),
            shared_key,
            hka,
            hkb,
            &bob_spk,
            &bob_spk_pub,
        )
        .unwrap();
        (alice, bob)
    }

    #[test]
    fn full_ratchet_roundtrip() {
        let (mut alice, mut bob) = paired_sessions();

        for i in 0..3 {
            let ct = alice.encrypt(b"hello from alice", 64).unwrap();
            let pt = bob.decrypt(&ct).unwrap();
            assert_eq!(pt, b"hello from alice", "message {i}");
        }

        for i in 0..2 {
            let ct = bob.encrypt(b"hi back", 64).unwrap();
            let pt = alice.decrypt(&ct).unwrap();
            assert_eq!(pt, b"hi back", "bob message {i}");
        }

        let ct = alice.encrypt(b"final", 64).unwrap();
        let pt = bob.decrypt(&ct).unwrap();
        assert_eq!(pt, b"final");
    }

    #[test]
    fn out_of_order_messages_use_skipped_key_table() {
        let (mut alice, mut bob) = paired_sessions();

        let c0 = alice.encrypt(b"zero", 32).unwrap();
        let c1 = alice.encrypt(b"one", 32).unwrap();
        let c2 = alice.encrypt(b"two", 32).unwrap();

        assert_eq!(bob.decrypt(&c2).unwrap(), b"two");
        assert_eq!(bob.decrypt(&c0).unwrap(), b"zero");
        assert_eq!(bob.decrypt(&c1).unwrap(), b"one");
    }

    #[test]
    fn encrypted_output_is_fixed_size_regardless_of_plaintext_len() {
        let (mut alice, _bob) = paired_sessions();
        let short = alice.encrypt(b"hi", 128).unwrap();
        let (mut alice2, _) = paired_sessions();
        let long = alice2.encrypt(b"a rather longer message body here", 128).unwrap();
        assert_eq!(short.len(), long.len());
        assert_eq!(short.len(), padding::encrypted_message_len(128));
    }

    #[test]
    fn too_many_skipped_messages_is_rejected() {
        let (mut alice, mut bob) = paired_sessions();
        for _ in 0..=(MAX_SKIP + 1) {
            alice.encrypt(b"x", 16).unwrap();
        }
        let last = alice.encrypt(b"final", 16).unwrap();
        assert!(matches!(bob.decrypt(&last), Err(CryptoError::TooManySkipped(_))));
    }
}
