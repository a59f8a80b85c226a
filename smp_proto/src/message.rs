//! Agent-level plaintext messages (spec.md §4.8) — what a ratchet `decrypt`
//! yields, once integrity-checked against the connection's sequence state.

use thiserror::Error;

use crate::codec::{self, CodecError, Reader};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("malformed agent message: {0}")]
    Malformed(&'static str),
}

const TAG_HELLO: u8 = 1;
const TAG_REPLY: u8 = 2;
const TAG_A_MSG: u8 = 3;
const TAG_INTRO: u8 = 4;
const TAG_INTRO_INVITE: u8 = 5;

/// A queue descriptor as carried by `REPLY` and connection-link contact
/// introductions (spec.md §4.5/§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub server: String,
    pub sender_id: Vec<u8>,
    pub dh_public_key: Vec<u8>,
}

impl QueueInfo {
    fn encode(&self, out: &mut Vec<u8>) {
        codec::put_bytes(out, self.server.as_bytes());
        codec::put_bytes(out, &self.sender_id);
        codec::put_bytes(out, &self.dh_public_key);
    }

    fn decode(r: &mut Reader) -> Result<Self, MessageError> {
        let server = String::from_utf8(r.bytes()?.to_vec())
            .map_err(|_| MessageError::Malformed("server host is not UTF-8"))?;
        let sender_id = r.bytes()?.to_vec();
        let dh_public_key = r.bytes()?.to_vec();
        Ok(Self { server, sender_id, dh_public_key })
    }
}

/// The plaintext tag carried inside a ratchet message (spec.md §4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AMessage {
    /// First agent-level message after key installation; completes queue
    /// activation (`Secured` -> `Active`).
    Hello,
    /// Delivers a second queue's address, upgrading a simplex connection to
    /// duplex. Initiator-only, optional.
    Reply { queue: QueueInfo },
    /// An ordinary application message body.
    AMsg { body: Vec<u8> },
    /// Proposes introducing the peer to a third party's contact (identity
    /// key + one queue to reach them).
    Introduce { peer_identity_key: Vec<u8>, queue: QueueInfo },
    /// Accepts a prior `Introduce`, returning the inviter's own queue so the
    /// two introduced parties can connect.
    IntroInvite { queue: QueueInfo },
}

impl AMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            AMessage::Hello => codec::put_u8(&mut out, TAG_HELLO),
            AMessage::Reply { queue } => {
                codec::put_u8(&mut out, TAG_REPLY);
                queue.encode(&mut out);
            }
            AMessage::AMsg { body } => {
                codec::put_u8(&mut out, TAG_A_MSG);
                out.extend_from_slice(body); // Tail
            }
            AMessage::Introduce { peer_identity_key, queue } => {
                codec::put_u8(&mut out, TAG_INTRO);
                codec::put_bytes(&mut out, peer_identity_key);
                queue.encode(&mut out);
            }
            AMessage::IntroInvite { queue } => {
                codec::put_u8(&mut out, TAG_INTRO_INVITE);
                queue.encode(&mut out);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut r = Reader::new(bytes);
        let tag = r.u8()?;
        Ok(match tag {
            TAG_HELLO => AMessage::Hello,
            TAG_REPLY => AMessage::Reply { queue: QueueInfo::decode(&mut r)? },
            TAG_A_MSG => AMessage::AMsg { body: r.tail().to_vec() },
            TAG_INTRO => {
                let peer_identity_key = r.bytes()?.to_vec();
                let queue = QueueInfo::decode(&mut r)?;
                AMessage::Introduce { peer_identity_key, queue }
            }
            TAG_INTRO_INVITE => AMessage::IntroInvite { queue: QueueInfo::decode(&mut r)? },
            _ => return Err(MessageError::Malformed("unknown AMessage tag")),
        })
    }
}

/// What actually travels inside the ratchet's plaintext (spec.md §4.8's
/// `previousMsgHash` invariant, §3's `external_snd_id` sequencing): the
/// sender's own monotonic message counter and a hash of the prior message it
/// sent on this connection, wrapping the agent-level tag. Kept separate from
/// the ratchet's internal per-DH-chain-turn counter (`RatchetHeader::n`,
/// which resets to 0 on every `dh_ratchet` step) since that counter cannot
/// serve as a stable external sequence number across ratchet turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBody {
    pub external_snd_id: u64,
    pub previous_msg_hash: [u8; 32],
    pub tag: AMessage,
}

impl MsgBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        codec::put_u64(&mut out, self.external_snd_id);
        out.extend_from_slice(&self.previous_msg_hash);
        out.extend_from_slice(&self.tag.encode()); // Tail
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let mut r = Reader::new(bytes);
        let external_snd_id = r.u64()?;
        let previous_msg_hash = r.array32()?;
        let tag = AMessage::decode(r.tail())?;
        Ok(Self { external_snd_id, previous_msg_hash, tag })
    }
}

/// Classification of a decrypted ratchet message against the connection's
/// sequence state (spec.md §3/§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Ok,
    /// Received `external_snd_id` did not match `previous + 1`; carries the
    /// received id.
    BadId(u64),
    /// The same `external_snd_id` was already delivered successfully.
    Duplicate,
    /// One or more messages in `[from, to]` were skipped (delivered out of
    /// order and not yet seen).
    Skipped(u64, u64),
    /// `previousMsgHash` did not match the sender-side hash of the prior
    /// message.
    BadHash,
}

/// Inbound message record, post integrity-check (spec.md §3 Message/Inbound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub internal_id: u64,
    pub internal_rcv_id: u64,
    pub connection_id: String,
    pub external_snd_id: u64,
    pub external_snd_ts: u64,
    pub broker_msg_id: Vec<u8>,
    pub broker_ts: u64,
    pub body: AMessage,
    pub content_hash: [u8; 32],
    pub integrity: Integrity,
}

/// Outbound message record, as persisted before a `SEND` (spec.md §3
/// Message/Outbound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub internal_id: u64,
    pub internal_snd_id: u64,
    pub connection_id: String,
    pub ts: u64,
    pub body: AMessage,
    pub content_hash: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> QueueInfo {
        QueueInfo {
            server: "smp.example.org".into(),
            sender_id: vec![1, 2, 3],
            dh_public_key: vec![9; 32],
        }
    }

    #[test]
    fn hello_roundtrip() {
        let encoded = AMessage::Hello.encode();
        assert_eq!(AMessage::decode(&encoded).unwrap(), AMessage::Hello);
    }

    #[test]
    fn reply_roundtrip_carries_queue() {
        let msg = AMessage::Reply { queue: queue() };
        let encoded = msg.encode();
        assert_eq!(AMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn a_msg_roundtrip_arbitrary_body() {
        let msg = AMessage::AMsg { body: vec![0xDE, 0xAD, 0xBE, 0xEF] };
        let encoded = msg.encode();
        assert_eq!(AMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn introduce_roundtrip() {
        let msg = AMessage::Introduce { peer_identity_key: vec![4, 5, 6], queue: queue() };
        let encoded = msg.encode();
        assert_eq!(AMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert!(AMessage::decode(&[0xFF]).is_err());
    }

    #[test]
    fn msg_body_roundtrip_carries_sequence_and_hash() {
        let body = MsgBody {
            external_snd_id: 42,
            previous_msg_hash: [7u8; 32],
            tag: AMessage::AMsg { body: vec![1, 2, 3] },
        };
        let encoded = body.encode();
        assert_eq!(MsgBody::decode(&encoded).unwrap(), body);
    }
}
