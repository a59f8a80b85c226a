//! X3DH asynchronous key agreement (spec.md §4.4, C5 handshake).
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - RFC 5869 (HKDF):  <https://datatracker.ietf.org/doc/html/rfc5869>
//!
//! Protocol:
//!   The initiator fetches the responder's published key bundle:
//!     IK_B  (identity, Ed25519 public → converted to X25519)
//!     SPK_B (signed prekey, X25519) + IK_B signature over SPK_B
//!     OPK_B (optional one-time prekey, X25519)
//!
//!   The initiator generates ONE ephemeral keypair EK_A (X25519).
//!
//!   DH calculations (using a single EK_A throughout):
//!     DH1 = DH(IK_A_x25519, SPK_B)     — mutual authentication
//!     DH2 = DH(EK_A,         IK_B_x25519) — forward secrecy
//!     DH3 = DH(EK_A,         SPK_B)     — replay protection
//!     DH4 = DH(EK_A,         OPK_B)     — one-time forward secrecy [optional]
//!
//!   SK = HKDF(salt=0, ikm = 0xFF*32 || DH1 || DH2 || DH3 [|| DH4], info="smp-x3dh-v1")
//!
//! `SK` feeds the Double Ratchet as the initial root key, along with two
//! header keys derived from it (see [`crate::kdf::initial_header_keys`]). If
//! the initiator proposes a SNTRUP761 public key (`kem_pub`, version-gated,
//! §4.4.2), the responder's ciphertext and shared secret are mixed into the
//! ratchet's root key separately via [`crate::ratchet::RatchetSession::mix_kem_secret`]
//! — X3DH itself only carries the proposal/ciphertext bytes on the wire.
//!
//! Non-negotiable:
//!   - The initiator MUST verify the SPK signature before computing any DH.
//!   - The initiator sends `(IK_A_pub, EK_A_pub, opk_id?, kem_pub?)` as the init header.
//!   - The responder reconstructs the same DH set and derives SK.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{error::CryptoError, identity::IdentityKeyPair, kdf};

fn b64d(s: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD.decode(s).map_err(CryptoError::Base64Decode)
}

fn to_32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKey("expected 32-byte key".into()))
}

/// Convert an Ed25519 signing key (32 bytes) to an X25519 static secret via
/// the clamped SHA-512 expansion ed25519-dalek uses internally.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 verifying key (public, 32 bytes) to an X25519 public
/// key via the birational map from the Ed25519 curve to Curve25519.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    let montgomery = point.to_montgomery();
    Ok(X25519Public::from(montgomery.to_bytes()))
}

/// Published by each connection endpoint, consumed by session initiators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundle {
    pub entity_id: String,
    /// Ed25519 identity public key (base64)
    pub ik_pub: String,
    /// X25519 signed prekey (base64)
    pub spk_pub: String,
    /// Ed25519 signature over raw SPK_pub bytes (base64)
    pub spk_sig: String,
    /// X25519 one-time prekey (consumed once; base64)
    pub opk_pub: Option<String>,
    /// Opaque OPK identifier so the responder can delete the used one
    pub opk_id: Option<String>,
}

/// Generate a signed prekey: an X25519 keypair with the public half signed
/// by the identity key.
pub fn generate_signed_prekey(
    identity: &IdentityKeyPair,
) -> Result<(StaticSecret, X25519Public, Vec<u8>), CryptoError> {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    let sig = identity.sign(public.as_bytes());
    Ok((secret, public, sig))
}

/// Generate a batch of one-time prekeys (X25519).
pub fn generate_one_time_prekeys(count: usize) -> Vec<(StaticSecret, X25519Public)> {
    (0..count)
        .map(|_| {
            let s = StaticSecret::random_from_rng(OsRng);
            let p = X25519Public::from(&s);
            (s, p)
        })
        .collect()
}

/// Sent alongside the first ciphertext so the responder can derive SK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X3DHHeader {
    pub session_id: String,
    pub sender_entity_id: String,
    /// Initiator's Ed25519 identity public key (base64)
    pub ik_pub: String,
    /// Initiator's ephemeral X25519 public key (base64)
    pub ek_pub: String,
    /// Which OPK was consumed (opaque id; `None` if the bundle had none)
    pub opk_id: Option<String>,
    /// Hybrid-KEM ciphertext encapsulated against the responder's published
    /// SNTRUP761 public key, version-gated (base64). `None` unless the
    /// responder's bundle carried a KEM proposal.
    pub kem_pub: Option<String>,
}

/// Result of the X3DH handshake: a shared secret plus the init header.
pub struct X3DHResult {
    /// 32-byte shared key → feeds the Double Ratchet as initial root key
    pub shared_key: [u8; 32],
    /// Header keys for the ratchet's initial sending/receiving chains
    pub header_keys: ([u8; 32], [u8; 32]),
    pub header: X3DHHeader,
}

/// Run the initiator side of the handshake.
///
/// Steps: verify the SPK signature, convert identity keys to X25519,
/// generate one ephemeral X25519 keypair, compute DH1..DH4, derive SK.
pub fn initiate(
    session_id: String,
    my_entity_id: &str,
    my_ik: &IdentityKeyPair,
    bundle: &PrekeyBundle,
    kem_pub: Option<Vec<u8>>,
) -> Result<X3DHResult, CryptoError> {
    let ik_b_ed_bytes = b64d(&bundle.ik_pub)?;
    let ik_b_ed = to_32(&ik_b_ed_bytes)?;
    let spk_b_bytes = b64d(&bundle.spk_pub)?;
    let spk_b_raw = to_32(&spk_b_bytes)?;
    let spk_sig_bytes = b64d(&bundle.spk_sig)?;

    IdentityKeyPair::verify(&ik_b_ed, &spk_b_raw, &spk_sig_bytes)?;

    let ik_a_x = ed25519_secret_to_x25519(my_ik.secret_bytes());
    let ik_b_x = ed25519_pub_to_x25519(&ik_b_ed)?;
    let spk_b = X25519Public::from(spk_b_raw);

    let ek_a = StaticSecret::random_from_rng(OsRng);
    let ek_a_pub = X25519Public::from(&ek_a);

    let dh1 = ik_a_x.diffie_hellman(&spk_b);
    let dh2 = ek_a.diffie_hellman(&ik_b_x);
    let dh3 = ek_a.diffie_hellman(&spk_b);

    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());

    let mut opk_id_out = None;
    if let Some(ref opk_b64) = bundle.opk_pub {
        let opk_raw = to_32(&b64d(opk_b64)?)?;
        let opk_b = X25519Public::from(opk_raw);
        let dh4 = ek_a.diffie_hellman(&opk_b);
        ikm.extend_from_slice(dh4.as_bytes());
        opk_id_out = bundle.opk_id.clone();
    }

    let mut sk = [0u8; 32];
    kdf::hkdf_expand(&ikm, Some(&[0u8; 32]), b"smp-x3dh-v1", &mut sk)?;
    ikm.zeroize();

    let header_keys = kdf::initial_header_keys(&sk)?;

    Ok(X3DHResult {
        shared_key: sk,
        header_keys,
        header: X3DHHeader {
            session_id,
            sender_entity_id: my_entity_id.to_string(),
            ik_pub: URL_SAFE_NO_PAD.encode(&my_ik.public.0),
            ek_pub: URL_SAFE_NO_PAD.encode(ek_a_pub.as_bytes()),
            opk_id: opk_id_out,
            kem_pub: kem_pub.map(|b| URL_SAFE_NO_PAD.encode(b)),
        },
    })
}

/// Run the responder side of the handshake, reconstructing the same `SK`.
///
/// `my_ik` — the responder's Ed25519 identity keypair
/// `my_spk_secret` — the responder's signed prekey X25519 secret
/// `my_opk_secret` — the consumed OPK secret, if the init used one
/// `sender_ik_ed_pub` — the initiator's Ed25519 identity public key
pub fn respond(
    my_ik: &IdentityKeyPair,
    my_spk_secret: &StaticSecret,
    my_opk_secret: Option<&StaticSecret>,
    sender_ik_ed_pub: &[u8; 32],
    header: &X3DHHeader,
) -> Result<([u8; 32], ([u8; 32], [u8; 32])), CryptoError> {
    let ek_a_bytes = b64d(&header.ek_pub)?;
    let ek_a = X25519Public::from(to_32(&ek_a_bytes)?);

    let sender_ik_x = ed25519_pub_to_x25519(sender_ik_ed_pub)?;
    let ik_b_x = ed25519_secret_to_x25519(my_ik.secret_bytes());

    // Mirrors the initiator's DH order exactly (DH is commutative):
    //   DH1 = IK_A × SPK_B,  DH2 = EK_A × IK_B,  DH3 = EK_A × SPK_B
    let dh1 = my_spk_secret.diffie_hellman(&sender_ik_x);
    let dh2 = ik_b_x.diffie_hellman(&ek_a);
    let dh3 = my_spk_secret.diffie_hellman(&ek_a);

    let mut ikm = vec![0xFFu8; 32];
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());

    if let Some(opk_sec) = my_opk_secret {
        let dh4 = opk_sec.diffie_hellman(&ek_a);
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let mut sk = [0u8; 32];
    kdf::hkdf_expand(&ikm, Some(&[0u8; 32]), b"smp-x3dh-v1", &mut sk)?;
    ikm.zeroize();

    let header_keys = kdf::initial_header_keys(&sk)?;
    Ok((sk, header_keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x3dh_roundtrip_without_opk() {
        let alice_ik = IdentityKeyPair::generate().unwrap();
        let bob_ik = IdentityKeyPair::generate().unwrap();

        let (bob_spk_secret, bob_spk_pub, bob_spk_sig) = generate_signed_prekey(&bob_ik).unwrap();

        let bundle = PrekeyBundle {
            entity_id: "bob".into(),
            ik_pub: URL_SAFE_NO_PAD.encode(&bob_ik.public.0),
            spk_pub: URL_SAFE_NO_PAD.encode(bob_spk_pub.as_bytes()),
            spk_sig: URL_SAFE_NO_PAD.encode(&bob_spk_sig),
            opk_pub: None,
            opk_id: None,
        };

        let result = initiate("sess-1".into(), "alice", &alice_ik, &bundle, None).unwrap();

        let alice_ik_ed: [u8; 32] = alice_ik.public.0.clone().try_into().unwrap();
        let (bob_sk, bob_header_keys) =
            respond(&bob_ik, &bob_spk_secret, None, &alice_ik_ed, &result.header).unwrap();

        assert_eq!(result.shared_key, bob_sk, "both sides must derive the same SK");
        assert_eq!(result.header_keys, bob_header_keys);
    }

    #[test]
    fn x3dh_roundtrip_with_opk() {
        let alice_ik = IdentityKeyPair::generate().unwrap();
        let bob_ik = IdentityKeyPair::generate().unwrap();

        let (bob_spk_secret, bob_spk_pub, bob_spk_sig) = generate_signed_prekey(&bob_ik).unwrap();
        let opks = generate_one_time_prekeys(1);
        let (ref bob_opk_secret, ref bob_opk_pub) = opks[0];

        let bundle = PrekeyBundle {
            entity_id: "bob".into(),
            ik_pub: URL_SAFE_NO_PAD.encode(&bob_ik.public.0),
            spk_pub: URL_SAFE_NO_PAD.encode(bob_spk_pub.as_bytes()),
            spk_sig: URL_SAFE_NO_PAD.encode(&bob_spk_sig),
            opk_pub: Some(URL_SAFE_NO_PAD.encode(bob_opk_pub.as_bytes())),
            opk_id: Some("opk-0".into()),
        };

        let result = initiate("sess-2".into(), "alice", &alice_ik, &bundle, None).unwrap();

        let alice_ik_ed: [u8; 32] = alice_ik.public.0.clone().try_into().unwrap();
        let (bob_sk, _) = respond(
            &bob_ik,
            &bob_spk_secret,
            Some(bob_opk_secret),
            &alice_ik_ed,
            &result.header,
        )
        .unwrap();

        assert_eq!(result.shared_key, bob_sk);
        assert_eq!(result.header.opk_id.as_deref(), Some("opk-0"));
    }

    #[test]
    fn rejects_invalid_spk_signature() {
        let alice_ik = IdentityKeyPair::generate().unwrap();
        let bob_ik = IdentityKeyPair::generate().unwrap();
        let evil_ik = IdentityKeyPair::generate().unwrap();

        let (_spk_secret, spk_pub, _good_sig) = generate_signed_prekey(&bob_ik).unwrap();
        let evil_sig = evil_ik.sign(spk_pub.as_bytes());

        let bundle = PrekeyBundle {
            entity_id: "bob".into(),
            ik_pub: URL_SAFE_NO_PAD.encode(&bob_ik.public.0),
            spk_pub: URL_SAFE_NO_PAD.encode(spk_pub.as_bytes()),
            spk_sig: URL_SAFE_NO_PAD.encode(&evil_sig),
            opk_pub: None,
            opk_id: None,
        };

        let err = initiate("sess-3".into(), "alice", &alice_ik, &bundle, None);
        assert!(err.is_err(), "must reject an SPK signed by the wrong identity");
    }

    #[test]
    fn propose_and_accept_kem_roundtrip_when_pq_enabled() {
        #[cfg(feature = "pq")]
        {
            let kp = crate::ratchet::kem::sntrup::generate();
            let their_public =
                pqcrypto_traits::kem::PublicKey::as_bytes(&kp.public).to_vec();
            let (ciphertext, responder_secret) =
                crate::ratchet::kem::sntrup::respond(&their_public).unwrap();
            let initiator_secret =
                crate::ratchet::kem::sntrup::accept(&kp.secret, &ciphertext).unwrap();
            assert_eq!(responder_secret, initiator_secret);
        }
    }
}
