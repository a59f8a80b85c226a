//! Connection link format (spec.md §6) — the URI handed peer-to-peer out of
//! band to establish a new connection.
//!
//! `simplex:/invitation#/v2?q=<base64url queues>&h=<base64url handshake>`
//!
//! An opaque scheme prefix (`invitation` or `contact`), a version segment,
//! one or more queue descriptors, and the initial ratchet handshake
//! parameters (X3DH public bundle, optional hybrid-KEM proposal). Binary
//! sections are base64url; any textual query value is percent-encoded.
//! Must round-trip exactly (spec.md §8).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

use crate::codec::{self, CodecError, Reader};
use crate::message::QueueInfo;

const QUERY_FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'&').add(b'=').add(b'#').add(b'?');

#[derive(Debug, Error)]
pub enum UriError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("link is missing its scheme prefix")]
    MissingScheme,
    #[error("unrecognized link kind {0:?}")]
    UnknownKind(String),
    #[error("malformed version segment {0:?}")]
    BadVersion(String),
    #[error("malformed query string")]
    BadQuery,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("link carries no queue descriptors")]
    NoQueues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Invitation,
    Contact,
}

impl LinkKind {
    fn prefix(self) -> &'static str {
        match self {
            LinkKind::Invitation => "simplex:/invitation#/",
            LinkKind::Contact => "simplex:/contact#/",
        }
    }
}

/// The public half of the X3DH + optional hybrid-KEM handshake parameters
/// carried by a connection link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeParams {
    pub identity_key: Vec<u8>,
    pub signed_prekey: Vec<u8>,
    pub signed_prekey_sig: Vec<u8>,
    pub one_time_prekey: Option<Vec<u8>>,
    pub kem_proposal: Option<Vec<u8>>,
}

impl HandshakeParams {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        codec::put_bytes(&mut out, &self.identity_key);
        codec::put_bytes(&mut out, &self.signed_prekey);
        codec::put_bytes(&mut out, &self.signed_prekey_sig);
        codec::put_bytes(&mut out, self.one_time_prekey.as_deref().unwrap_or(&[]));
        codec::put_bytes(&mut out, self.kem_proposal.as_deref().unwrap_or(&[]));
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, UriError> {
        let mut r = Reader::new(bytes);
        let identity_key = r.bytes()?.to_vec();
        let signed_prekey = r.bytes()?.to_vec();
        let signed_prekey_sig = r.bytes()?.to_vec();
        let otp = r.bytes()?;
        let one_time_prekey = if otp.is_empty() { None } else { Some(otp.to_vec()) };
        let kem = r.bytes()?;
        let kem_proposal = if kem.is_empty() { None } else { Some(kem.to_vec()) };
        Ok(Self { identity_key, signed_prekey, signed_prekey_sig, one_time_prekey, kem_proposal })
    }
}

/// A fully-formed connection link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLink {
    pub kind: LinkKind,
    pub version: u16,
    pub queues: Vec<QueueInfo>,
    pub handshake: HandshakeParams,
}

impl ConnectionLink {
    pub fn encode(&self) -> Result<String, UriError> {
        if self.queues.is_empty() {
            return Err(UriError::NoQueues);
        }
        let mut queues_bytes = Vec::new();
        codec::put_u8(&mut queues_bytes, self.queues.len() as u8);
        for q in &self.queues {
            codec::put_bytes(&mut queues_bytes, q.server.as_bytes());
            codec::put_bytes(&mut queues_bytes, &q.sender_id);
            codec::put_bytes(&mut queues_bytes, &q.dh_public_key);
        }
        let q_b64 = URL_SAFE_NO_PAD.encode(queues_bytes);
        let h_b64 = URL_SAFE_NO_PAD.encode(self.handshake.encode());

        let mut link = String::from(self.kind.prefix());
        link.push_str(&format!("v{}", self.version));
        link.push('?');
        link.push_str(&format!("q={}", utf8_percent_encode(&q_b64, QUERY_FRAGMENT)));
        link.push('&');
        link.push_str(&format!("h={}", utf8_percent_encode(&h_b64, QUERY_FRAGMENT)));
        Ok(link)
    }

    pub fn decode(link: &str) -> Result<Self, UriError> {
        let (kind, rest) = if let Some(rest) = link.strip_prefix(LinkKind::Invitation.prefix()) {
            (LinkKind::Invitation, rest)
        } else if let Some(rest) = link.strip_prefix(LinkKind::Contact.prefix()) {
            (LinkKind::Contact, rest)
        } else {
            return Err(UriError::MissingScheme);
        };

        let (version_part, query_part) = rest.split_once('?').ok_or(UriError::BadQuery)?;
        let version_str = version_part.strip_prefix('v').ok_or_else(|| UriError::BadVersion(version_part.into()))?;
        let version: u16 = version_str.parse().map_err(|_| UriError::BadVersion(version_part.into()))?;

        let mut q_val: Option<String> = None;
        let mut h_val: Option<String> = None;
        for pair in query_part.split('&') {
            let (key, value) = pair.split_once('=').ok_or(UriError::BadQuery)?;
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| UriError::BadQuery)?
                .into_owned();
            match key {
                "q" => q_val = Some(decoded),
                "h" => h_val = Some(decoded),
                _ => {}
            }
        }
        let q_val = q_val.ok_or(UriError::BadQuery)?;
        let h_val = h_val.ok_or(UriError::BadQuery)?;

        let queues_bytes = URL_SAFE_NO_PAD.decode(q_val)?;
        let handshake_bytes = URL_SAFE_NO_PAD.decode(h_val)?;

        let mut r = Reader::new(&queues_bytes);
        let count = r.u8()? as usize;
        let mut queues = Vec::with_capacity(count);
        for _ in 0..count {
            let server = String::from_utf8(r.bytes()?.to_vec()).map_err(|_| UriError::BadQuery)?;
            let sender_id = r.bytes()?.to_vec();
            let dh_public_key = r.bytes()?.to_vec();
            queues.push(QueueInfo { server, sender_id, dh_public_key });
        }
        if queues.is_empty() {
            return Err(UriError::NoQueues);
        }

        let handshake = HandshakeParams::decode(&handshake_bytes)?;
        Ok(Self { kind, version, queues, handshake })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_link(kind: LinkKind) -> ConnectionLink {
        ConnectionLink {
            kind,
            version: 2,
            queues: vec![QueueInfo {
                server: "smp://abc123@relay.example.org".into(),
                sender_id: vec![1, 2, 3, 4],
                dh_public_key: vec![9u8; 32],
            }],
            handshake: HandshakeParams {
                identity_key: vec![1u8; 32],
                signed_prekey: vec![2u8; 32],
                signed_prekey_sig: vec![3u8; 64],
                one_time_prekey: Some(vec![4u8; 32]),
                kem_proposal: None,
            },
        }
    }

    #[test]
    fn invitation_link_roundtrips() {
        let link = sample_link(LinkKind::Invitation);
        let encoded = link.encode().unwrap();
        let decoded = ConnectionLink::decode(&encoded).unwrap();
        assert_eq!(link, decoded);
    }

    #[test]
    fn contact_link_roundtrips_with_kem_proposal() {
        let mut link = sample_link(LinkKind::Contact);
        link.handshake.kem_proposal = Some(vec![5u8; 1158]);
        link.handshake.one_time_prekey = None;
        let encoded = link.encode().unwrap();
        let decoded = ConnectionLink::decode(&encoded).unwrap();
        assert_eq!(link, decoded);
    }

    #[test]
    fn multiple_queue_descriptors_roundtrip() {
        let mut link = sample_link(LinkKind::Invitation);
        link.queues.push(QueueInfo {
            server: "smp://def456@relay2.example.org".into(),
            sender_id: vec![5, 6, 7],
            dh_public_key: vec![8u8; 32],
        });
        let encoded = link.encode().unwrap();
        let decoded = ConnectionLink::decode(&encoded).unwrap();
        assert_eq!(link, decoded);
    }

    #[test]
    fn empty_queues_is_rejected() {
        let mut link = sample_link(LinkKind::Invitation);
        link.queues.clear();
        assert!(matches!(link.encode(), Err(UriError::NoQueues)));
    }

    #[test]
    fn missing_scheme_is_rejected() {
        assert!(matches!(ConnectionLink::decode("https://example.org"), Err(UriError::MissingScheme)));
    }
}
