//! Inbound message pipeline (spec.md §4.8): decrypt the per-queue DH
//! envelope, branch on the private header, ratchet-decrypt and
//! integrity-check, interpret the agent-level tag, and persist.

use base64::Engine;
use smp_proto::envelope::{ClientMsgEnvelope, PrivateHeader};
use smp_proto::message::{AMessage, InboundMessage, Integrity, MsgBody};

use smp_crypto::identity::IdentityKeyPair;
use smp_crypto::ratchet::RatchetSession;
use smp_crypto::x3dh::{self, X3DHHeader};

use crate::connection_api;
use crate::error::{AgentError, AgentInnerError, RatchetErrorKind};
use crate::queue::Connection;
use crate::state_machine::{self, Transition};
use crate::store::Store;

/// Decapsulate the initiator's hybrid-KEM ciphertext (spec.md §4.4.2) using
/// the secret kept alongside the receive queue since [`connection_api::create_invitation`]
/// proposed it. Rejects a ciphertext on a build without the `pq` feature
/// instead of silently skipping the mix-in, since that would let a peer
/// downgrade the session to classical DH without either side noticing.
#[cfg(feature = "pq")]
fn decapsulate_kem(kem_secret: &[u8], ciphertext: &[u8]) -> Result<[u8; 32], AgentError> {
    smp_crypto::ratchet::kem::sntrup::accept_bytes(kem_secret, ciphertext).map_err(Into::into)
}

#[cfg(not(feature = "pq"))]
fn decapsulate_kem(_kem_secret: &[u8], _ciphertext: &[u8]) -> Result<[u8; 32], AgentError> {
    Err(AgentError::Ratchet(RatchetErrorKind::KemState))
}

/// What the pipeline produced for a single relay message.
pub enum InboundOutcome {
    /// A confirmation envelope completed the X3DH handshake; the queue
    /// moved `New` -> `Confirmed`. The runtime still owes the relay a
    /// `KEY` command installing `sender_auth_key` before the queue can
    /// move to `Secured`.
    Confirmed { sender_auth_key: Vec<u8> },
    /// An ordinary ratchet-encrypted message was decrypted and classified.
    Message(InboundMessage),
}

/// Process one sealed `SEND` body addressed to `conn`'s receive queue.
pub async fn process_inbound(
    store: &dyn Store,
    identity: &IdentityKeyPair,
    conn_id: &str,
    conn: &Connection,
    sealed: &[u8],
) -> Result<InboundOutcome, AgentError> {
    let rcv_queue = conn.rcv_queue().ok_or_else(|| AgentError::Conn(crate::error::ConnError::Simplex))?;
    let already_duplex = conn.is_duplex();

    let envelope = ClientMsgEnvelope::open(sealed, &rcv_queue.rcv_dh_secret)
        .map_err(|e| AgentInnerError::Encryption(e.to_string()))?;

    match envelope.header {
        PrivateHeader::Confirmation(sender_auth_key) => {
            state_machine::on_confirmation(rcv_queue.status)?;

            let x3dh_header: X3DHHeader = serde_json::from_slice(&envelope.payload)
                .map_err(|e| AgentInnerError::Message(format!("malformed x3dh header: {e}")))?;
            // The X3DH header carries the initiator's identity key; the
            // private header's `sender_auth_key` is a separate, disposable
            // per-queue authenticator installed via `KEY`, not used here.
            let ik_pub_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(&x3dh_header.ik_pub)
                .map_err(|e| AgentInnerError::Message(format!("malformed x3dh identity key: {e}")))?;
            let sender_ik_ed: [u8; 32] = ik_pub_bytes
                .as_slice()
                .try_into()
                .map_err(|_| AgentInnerError::Message("x3dh identity key is not 32 bytes".into()))?;

            let (shared_key, (hka, hkb)) =
                x3dh::respond(identity, &rcv_queue.rcv_dh_secret, None, &sender_ik_ed, &x3dh_header)?;

            let my_spk_pub = x25519_dalek::PublicKey::from(&rcv_queue.rcv_dh_secret);
            let mut ratchet = RatchetSession::init_bob(
                conn_id.to_string(),
                x3dh_header.sender_entity_id.clone(),
                shared_key,
                hka,
                hkb,
                &rcv_queue.rcv_dh_secret,
                &my_spk_pub,
            )?;

            if let Some(ciphertext_b64) = &x3dh_header.kem_pub {
                let kem_secret = rcv_queue
                    .kem_secret
                    .as_ref()
                    .ok_or_else(|| AgentInnerError::Message("peer proposed a KEM exchange we never offered".into()))?;
                let ciphertext = base64::engine::general_purpose::URL_SAFE_NO_PAD
                    .decode(ciphertext_b64)
                    .map_err(|e| AgentInnerError::Message(format!("malformed KEM ciphertext: {e}")))?;
                let kem_shared_secret = decapsulate_kem(kem_secret, &ciphertext)?;
                ratchet.apply_kem_transition(smp_crypto::ratchet::kem::KemEvent::Propose)?;
                ratchet.apply_kem_transition(smp_crypto::ratchet::kem::KemEvent::Accept)?;
                ratchet.mix_kem_secret(&kem_shared_secret)?;
            }

            store.save_ratchet(conn_id, ratchet).await?;
            store.set_rcv_queue_status(conn_id, crate::queue::RcvQueueStatus::Confirmed).await?;

            Ok(InboundOutcome::Confirmed { sender_auth_key })
        }
        PrivateHeader::Empty => {
            let mut ratchet = store
                .load_ratchet(conn_id)
                .await?
                .ok_or_else(|| AgentInnerError::Message("no ratchet session for connection".into()))?;

            let plaintext = ratchet.decrypt(&envelope.payload)?;
            let msg_body = MsgBody::decode(&plaintext).map_err(|e| AgentInnerError::Message(e.to_string()))?;

            let ids = store.update_rcv_ids(conn_id).await?;
            let integrity = classify(&msg_body, ids.prev_ext_snd_id, ids.prev_rcv_hash);

            let transition = state_machine::classify_inbound(&msg_body.tag, rcv_queue.status, already_duplex)?;
            match transition {
                Transition::RcvMoved(status) => store.set_rcv_queue_status(conn_id, status).await?,
                Transition::SndMoved(_) | Transition::NoOp => {}
            }
            if let AMessage::Reply { queue } = &msg_body.tag {
                connection_api::accept_reply_queue(store, conn_id, queue).await?;
            }

            let content_hash = smp_crypto::hash::content_hash(&msg_body.tag.encode());
            let msg = InboundMessage {
                internal_id: ids.internal_id,
                internal_rcv_id: ids.internal_rcv_id,
                connection_id: conn_id.to_string(),
                external_snd_id: msg_body.external_snd_id,
                external_snd_ts: 0,
                broker_msg_id: Vec::new(),
                broker_ts: 0,
                body: msg_body.tag,
                content_hash,
                integrity,
            };

            store.save_ratchet(conn_id, ratchet).await?;
            store.create_rcv_msg(conn_id, msg.clone()).await?;

            Ok(InboundOutcome::Message(msg))
        }
    }
}

/// Classify a decrypted [`MsgBody`] against the connection's persisted
/// sequence/hash state (spec.md §3 `Integrity`): an exact successor whose
/// `previous_msg_hash` matches is `Ok`; a repeat of the last id is
/// `Duplicate`; a gap is `Skipped`; anything else in the sequence is
/// `BadId`. `BadHash` only fires on an otherwise-in-sequence message, since a
/// gap or replay already explains a hash mismatch without implying tampering.
fn classify(body: &MsgBody, prev_ext_snd_id: u64, prev_rcv_hash: [u8; 32]) -> Integrity {
    let sequence = classify_sequence(body.external_snd_id, prev_ext_snd_id);
    if sequence == Integrity::Ok && body.previous_msg_hash != prev_rcv_hash {
        return Integrity::BadHash;
    }
    sequence
}

fn classify_sequence(received: u64, prev: u64) -> Integrity {
    if received == prev {
        Integrity::Duplicate
    } else if received == prev + 1 {
        Integrity::Ok
    } else if received > prev + 1 {
        Integrity::Skipped(prev + 1, received - 1)
    } else {
        Integrity::BadId(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_classification() {
        assert_eq!(classify_sequence(1, 0), Integrity::Ok);
        assert_eq!(classify_sequence(0, 0), Integrity::Duplicate);
        assert_eq!(classify_sequence(5, 1), Integrity::Skipped(2, 4));
        assert_eq!(classify_sequence(0, 3), Integrity::BadId(0));
    }

    fn body(external_snd_id: u64, previous_msg_hash: [u8; 32]) -> MsgBody {
        MsgBody { external_snd_id, previous_msg_hash, tag: AMessage::Hello }
    }

    #[test]
    fn in_sequence_with_matching_hash_is_ok() {
        assert_eq!(classify(&body(1, [0u8; 32]), 0, [0u8; 32]), Integrity::Ok);
    }

    #[test]
    fn in_sequence_with_mismatched_hash_is_bad_hash() {
        assert_eq!(classify(&body(1, [9u8; 32]), 0, [0u8; 32]), Integrity::BadHash);
    }

    #[test]
    fn out_of_sequence_takes_priority_over_hash_mismatch() {
        assert_eq!(classify(&body(5, [9u8; 32]), 1, [0u8; 32]), Integrity::Skipped(2, 4));
    }
}
