//! Per-queue client message envelope (spec.md §4.8) — what a `SEND` body
//! decrypts to at the per-queue DH layer, before the ratchet ever sees it.
//!
//! Two layers wrap every message body:
//! 1. the per-queue anonymous DH envelope ([`smp_crypto::aead::queue_box_encrypt`]
//!    / [`smp_crypto::aead::queue_box_open`]), keyed by the recipient's
//!    `rcv_dh_secret` / the sender's copy of its public half;
//! 2. for everything but the queue's first message, the ratchet's own
//!    header+body encryption, carried here as opaque bytes.
//!
//! The relay never holds a key for either layer.

use thiserror::Error;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use smp_crypto::aead;
use smp_crypto::error::CryptoError;

use crate::codec::{self, CodecError, Reader};

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("malformed client message envelope: {0}")]
    Malformed(&'static str),
}

const TAG_CONFIRMATION: u8 = 0x01;
const TAG_EMPTY: u8 = 0x02;

/// Private header distinguishing a queue's first message from later ones
/// (spec.md §4.5/§4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateHeader {
    /// The sender's public auth key, carried by the confirmation message
    /// that moves a `New` queue to `Confirmed`.
    Confirmation(Vec<u8>),
    /// Every message once the queue is past its first exchange.
    Empty,
}

impl PrivateHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            PrivateHeader::Confirmation(key) => {
                codec::put_u8(out, TAG_CONFIRMATION);
                codec::put_bytes(out, key);
            }
            PrivateHeader::Empty => codec::put_u8(out, TAG_EMPTY),
        }
    }

    fn decode(r: &mut Reader) -> Result<Self, EnvelopeError> {
        match r.u8()? {
            TAG_CONFIRMATION => Ok(PrivateHeader::Confirmation(r.bytes()?.to_vec())),
            TAG_EMPTY => Ok(PrivateHeader::Empty),
            _ => Err(EnvelopeError::Malformed("unknown private header tag")),
        }
    }
}

/// What a `SEND` body decrypts to, at the per-queue DH layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMsgEnvelope {
    pub header: PrivateHeader,
    /// `Confirmation`: the X3DH handshake header bytes (see `smp_crypto::x3dh`).
    /// `Empty`: the ratchet's `(enc_header || aead_ciphertext)` output,
    /// opaque at this layer.
    pub payload: Vec<u8>,
}

impl ClientMsgEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.header.encode(&mut out);
        codec::put_bytes(&mut out, &self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut r = Reader::new(bytes);
        let header = PrivateHeader::decode(&mut r)?;
        let payload = r.bytes()?.to_vec();
        Ok(Self { header, payload })
    }

    /// Seal this envelope for the wire under the recipient's queue DH key.
    pub fn seal(&self, recipient_dh_public: &X25519Public) -> Result<Vec<u8>, EnvelopeError> {
        Ok(aead::queue_box_encrypt(recipient_dh_public, &self.encode(), b"smp-client-msg")?)
    }

    /// Open a sealed envelope with the recipient's `rcv_dh_secret`.
    pub fn open(sealed: &[u8], rcv_dh_secret: &StaticSecret) -> Result<Self, EnvelopeError> {
        let opened = aead::queue_box_open(rcv_dh_secret, sealed, b"smp-client-msg")?;
        Self::decode(&opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn confirmation_envelope_roundtrips() {
        let env = ClientMsgEnvelope {
            header: PrivateHeader::Confirmation(vec![1, 2, 3, 4]),
            payload: vec![5, 6, 7],
        };
        let encoded = env.encode();
        let decoded = ClientMsgEnvelope::decode(&encoded).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn seal_and_open_roundtrip() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let env = ClientMsgEnvelope { header: PrivateHeader::Empty, payload: vec![42; 96] };
        let sealed = env.seal(&public).unwrap();
        let opened = ClientMsgEnvelope::open(&sealed, &secret).unwrap();
        assert_eq!(env, opened);
    }

    #[test]
    fn open_rejects_wrong_secret() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let other = StaticSecret::random_from_rng(OsRng);
        let env = ClientMsgEnvelope { header: PrivateHeader::Empty, payload: vec![1] };
        let sealed = env.seal(&public).unwrap();
        assert!(ClientMsgEnvelope::open(&sealed, &other).is_err());
    }
}
