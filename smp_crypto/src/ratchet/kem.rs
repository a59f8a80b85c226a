//! Hybrid post-quantum KEM state machine (spec.md §4.4.2).
//!
//! If the initiator proposes a SNTRUP761 public key in the handshake reply
//! parameters, the responder generates a ciphertext and shared secret; both
//! mix it into the root-key derivation via [`super::RatchetSession::mix_kem_secret`].
//! Only three states are legal; anything else — accepting without a prior
//! proposal, or proposing twice in a reply — is a protocol error.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KemState {
    /// No hybrid KEM negotiated; root key derives from X25519 DH alone.
    NoKem,
    /// The initiator has proposed a KEM public key and is awaiting the
    /// responder's ciphertext.
    Propose,
    /// The responder's ciphertext/shared-secret has been mixed into the
    /// root key. Terminal state.
    Accept,
}

/// An event driving the KEM state machine forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KemEvent {
    /// Initiator includes a KEM public key in the handshake reply params.
    Propose,
    /// Responder mixes in its encapsulated shared secret.
    Accept,
}

impl KemState {
    /// Apply `event`, returning the new state or `KemState` error on an
    /// illegal transition (accept without proposal; propose-in-reply twice).
    pub fn advance(self, event: KemEvent) -> Result<Self, CryptoError> {
        match (self, event) {
            (KemState::NoKem, KemEvent::Propose) => Ok(KemState::Propose),
            (KemState::Propose, KemEvent::Accept) => Ok(KemState::Accept),
            (KemState::NoKem, KemEvent::Accept) => Err(CryptoError::KemState(
                "cannot accept a KEM ciphertext with no prior proposal".into(),
            )),
            (KemState::Propose, KemEvent::Propose) => Err(CryptoError::KemState(
                "KEM public key already proposed for this handshake".into(),
            )),
            (KemState::Accept, _) => Err(CryptoError::KemState(
                "KEM negotiation already completed for this session".into(),
            )),
        }
    }
}

/// SNTRUP761 keypair, ciphertext, and shared-secret wrappers. Gated behind
/// the `pq` feature; callers without it only ever see [`KemState::NoKem`].
#[cfg(feature = "pq")]
pub mod sntrup {
    use pqcrypto_sntrup761::sntrup761::{
        decapsulate, encapsulate, keypair, Ciphertext, PublicKey, SecretKey, SharedSecret,
    };
    use pqcrypto_traits::kem::{
        Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
    };

    use crate::error::CryptoError;

    pub struct KemKeyPair {
        pub public: PublicKey,
        pub secret: SecretKey,
    }

    /// Generate a fresh SNTRUP761 keypair for the handshake's KEM proposal.
    pub fn generate() -> KemKeyPair {
        let (public, secret) = keypair();
        KemKeyPair { public, secret }
    }

    /// Responder step: encapsulate against the initiator's public key,
    /// returning the ciphertext to send back and the shared secret to mix
    /// into the root key.
    pub fn respond(their_public: &[u8]) -> Result<(Vec<u8>, [u8; 32]), CryptoError> {
        let pk = PublicKey::from_bytes(their_public)
            .map_err(|e| CryptoError::KemState(format!("invalid KEM public key: {e}")))?;
        let (shared_secret, ciphertext) = encapsulate(&pk);
        Ok((ciphertext.as_bytes().to_vec(), to_32(shared_secret.as_bytes())))
    }

    /// Initiator step: decapsulate the responder's ciphertext with our
    /// secret key, recovering the same shared secret.
    pub fn accept(secret: &SecretKey, ciphertext: &[u8]) -> Result<[u8; 32], CryptoError> {
        let ct = Ciphertext::from_bytes(ciphertext)
            .map_err(|e| CryptoError::KemState(format!("invalid KEM ciphertext: {e}")))?;
        let shared_secret: SharedSecret = decapsulate(&ct, secret);
        Ok(to_32(shared_secret.as_bytes()))
    }

    fn to_32(bytes: &[u8]) -> [u8; 32] {
        crate::hash::hash(bytes)
    }

    /// [`generate`], flattened to raw bytes so callers that only persist
    /// opaque blobs (agent-level queue state) don't need this module's
    /// pqcrypto types in scope. Returns `(secret_bytes, public_bytes)`.
    pub fn generate_bytes() -> (Vec<u8>, Vec<u8>) {
        let kp = generate();
        (kp.secret.as_bytes().to_vec(), kp.public.as_bytes().to_vec())
    }

    /// [`accept`] from a raw secret-key blob produced by [`generate_bytes`].
    pub fn accept_bytes(secret_bytes: &[u8], ciphertext: &[u8]) -> Result<[u8; 32], CryptoError> {
        let secret = SecretKey::from_bytes(secret_bytes)
            .map_err(|e| CryptoError::KemState(format!("invalid KEM secret key: {e}")))?;
        accept(&secret, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        let s = KemState::NoKem.advance(KemEvent::Propose).unwrap();
        assert_eq!(s, KemState::Propose);
        let s = s.advance(KemEvent::Accept).unwrap();
        assert_eq!(s, KemState::Accept);
    }

    #[test]
    fn accept_without_proposal_is_illegal() {
        assert!(matches!(
            KemState::NoKem.advance(KemEvent::Accept),
            Err(CryptoError::KemState(_))
        ));
    }

    #[test]
    fn double_propose_is_illegal() {
        let s = KemState::NoKem.advance(KemEvent::Propose).unwrap();
        assert!(matches!(s.advance(KemEvent::Propose), Err(CryptoError::KemState(_))));
    }

    #[test]
    fn transition_after_accept_is_illegal() {
        let s = KemState::NoKem
            .advance(KemEvent::Propose)
            .unwrap()
            .advance(KemEvent::Accept)
            .unwrap();
        assert!(matches!(s.advance(KemEvent::Propose), Err(CryptoError::KemState(_))));
    }

    #[cfg(feature = "pq")]
    #[test]
    fn sntrup_roundtrip() {
        let kp = sntrup::generate();
        let their_public = pqcrypto_traits::kem::PublicKey::as_bytes(&kp.public).to_vec();
        let (ciphertext, responder_secret) = sntrup::respond(&their_public).unwrap();
        let initiator_secret = sntrup::accept(&kp.secret, &ciphertext).unwrap();
        assert_eq!(responder_secret, initiator_secret);
    }
}
