//! Connection API (spec.md §4.6, C8): create/join/accept-invitation,
//! subscribe, send, suspend, delete. Every entry point takes a `conn_id`
//! (empty means "generate one") and locks that connection's slot before
//! touching the store; multi-connection operations sort their conn_ids
//! first so two callers can never deadlock against each other.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex as SyncMutex;
use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;

use smp_crypto::identity::IdentityKeyPair;
use smp_crypto::x3dh::{self, PrekeyBundle};
use smp_proto::command::Command;
use smp_proto::message::QueueInfo;
use smp_proto::uri::{ConnectionLink, HandshakeParams, LinkKind};

use crate::error::{AgentError, AgentInnerError, ConnError, RatchetErrorKind};
use crate::notify::Ntf;
use crate::queue::{Connection, NotifierCreds, RcvQueue, RcvQueueStatus, SndQueue, SndQueueStatus};
use crate::store::Store;

/// Generate a hybrid-KEM keypair to publish alongside the invitation's X3DH
/// bundle (spec.md §4.4.2). `None` when built without the `pq` feature, in
/// which case the link carries no KEM proposal at all.
#[cfg(feature = "pq")]
fn propose_kem() -> Option<(Vec<u8>, Vec<u8>)> {
    Some(smp_crypto::ratchet::kem::sntrup::generate_bytes())
}

#[cfg(not(feature = "pq"))]
fn propose_kem() -> Option<(Vec<u8>, Vec<u8>)> {
    None
}

/// Encapsulate against a peer-published KEM public key (spec.md §4.4.2): the
/// joiner's half of the hybrid-KEM exchange. Returns the ciphertext to carry
/// back in the X3DH header and the shared secret the caller mixes into its
/// ratchet once it builds one. A proposal on a build without `pq` is a
/// downgrade attempt, not something to silently ignore.
#[cfg(feature = "pq")]
fn encapsulate_kem(their_public: &[u8]) -> Result<(Vec<u8>, [u8; 32]), AgentError> {
    smp_crypto::ratchet::kem::sntrup::respond(their_public).map_err(Into::into)
}

#[cfg(not(feature = "pq"))]
fn encapsulate_kem(_their_public: &[u8]) -> Result<(Vec<u8>, [u8; 32]), AgentError> {
    Err(AgentError::Ratchet(RatchetErrorKind::KemState))
}

/// Per-connection-id lock table, so concurrent API calls on different
/// connections never block each other.
#[derive(Default)]
pub struct ConnLocks {
    table: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConnLocks {
    fn slot(&self, conn_id: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock();
        table.entry(conn_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Lock `conn_ids`, deduplicated and sorted, so two callers racing over
    /// the same pair always acquire in the same order.
    pub async fn lock_all(&self, conn_ids: &[&str]) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut ids: Vec<&str> = conn_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.slot(id).lock_owned().await);
        }
        guards
    }
}

fn gen_conn_id(conn_id: &str, byte_len: usize) -> String {
    if !conn_id.is_empty() {
        return conn_id.to_string();
    }
    let mut bytes = vec![0u8; byte_len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create a new receive queue and the invitation link that advertises it
/// (spec.md §4.5 `New`, §6 connection links). Returns the `NEW` command the
/// caller hands to the transport and the link to share out of band.
pub async fn create_invitation(
    store: &dyn Store,
    identity: &IdentityKeyPair,
    locks: &ConnLocks,
    server: &str,
    conn_id_bytes: usize,
    conn_id: &str,
) -> Result<(String, Command, ConnectionLink), AgentError> {
    let conn_id = gen_conn_id(conn_id, conn_id_bytes);
    let _guard = locks.lock_all(&[&conn_id]).await;

    let rcv_auth = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);

    // The signed prekey doubles as the per-queue DH secret: it unseals both
    // the crypto-box envelope layer and (once a confirmation arrives) the
    // X3DH handshake itself, so link and envelope agree on one public key.
    let (spk_secret, spk_pub, spk_sig) = x3dh::generate_signed_prekey(identity)?;
    let kem = propose_kem();
    let kem_secret = kem.as_ref().map(|(secret, _)| secret.clone());
    let kem_public = kem.map(|(_, public)| public);

    let queue = RcvQueue {
        user_id: "default".to_string(),
        conn_id: conn_id.clone(),
        server: server.to_string(),
        rcv_id: Vec::new(), // filled in once the relay's `IDS` reply arrives
        snd_id: Vec::new(),
        rcv_private_auth_key: rcv_auth.clone(),
        rcv_dh_secret: spk_secret.clone(),
        e2e_priv_key: spk_secret,
        e2e_dh_secret: None,
        status: RcvQueueStatus::New,
        notifier_creds: None::<NotifierCreds>,
        primary: true,
        db_id: 0,
        kem_secret,
    };

    store.create_rcv_conn(&conn_id, queue).await?;
    store.create_invitation(&conn_id).await?;
    store.add_invitation_conn(&conn_id, &conn_id).await?;

    let cmd = Command::New { rcv_auth_key: rcv_auth.verifying_key().to_bytes().to_vec() };

    let link = ConnectionLink {
        kind: LinkKind::Invitation,
        version: smp_proto::command::CURRENT_VERSION,
        queues: vec![QueueInfo {
            server: server.to_string(),
            sender_id: Vec::new(),
            dh_public_key: spk_pub.as_bytes().to_vec(),
        }],
        handshake: HandshakeParams {
            identity_key: identity.public.0.clone(),
            signed_prekey: spk_pub.as_bytes().to_vec(),
            signed_prekey_sig: spk_sig,
            one_time_prekey: None,
            kem_proposal: kem_public,
        },
    };

    Ok((conn_id, cmd, link))
}

/// Join a connection advertised by `link`: create our own send queue
/// addressed at the peer's advertised receive queue, and run the
/// initiator side of X3DH against their published bundle.
///
/// If `link` carries a hybrid-KEM proposal, encapsulates against it and
/// returns the derived shared secret alongside the X3DH result; the caller
/// mixes it into the ratchet it builds from `X3DHResult` via
/// [`RatchetSession::mix_kem_secret`](smp_crypto::ratchet::RatchetSession::mix_kem_secret).
/// A proposal that arrives on a build without the `pq` feature is rejected
/// rather than silently dropped.
pub async fn join_invitation(
    store: &dyn Store,
    identity: &IdentityKeyPair,
    locks: &ConnLocks,
    conn_id_bytes: usize,
    conn_id: &str,
    link: &ConnectionLink,
) -> Result<(String, x3dh::X3DHResult, Option<[u8; 32]>), AgentError> {
    let conn_id = gen_conn_id(conn_id, conn_id_bytes);
    let _guard = locks.lock_all(&[&conn_id]).await;

    let queue_info = link.queues.first().ok_or(AgentError::Conn(ConnError::NotFound))?;

    let bundle = PrekeyBundle {
        entity_id: conn_id.clone(),
        ik_pub: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&link.handshake.identity_key),
        spk_pub: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&link.handshake.signed_prekey),
        spk_sig: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&link.handshake.signed_prekey_sig),
        opk_pub: link
            .handshake
            .one_time_prekey
            .as_ref()
            .map(|k| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(k)),
        opk_id: None,
    };

    let (kem_ciphertext, kem_shared_secret) = match &link.handshake.kem_proposal {
        Some(their_public) => {
            let (ciphertext, shared_secret) = encapsulate_kem(their_public)?;
            (Some(ciphertext), Some(shared_secret))
        }
        None => (None, None),
    };

    let result = x3dh::initiate(conn_id.clone(), &conn_id, identity, &bundle, kem_ciphertext)?;

    let snd_auth = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let snd_queue = SndQueue {
        server: queue_info.server.clone(),
        snd_id: queue_info.sender_id.clone(),
        snd_private_auth_key: snd_auth,
        e2e_dh_secret: x25519_dalek::PublicKey::from(
            <[u8; 32]>::try_from(queue_info.dh_public_key.as_slice())
                .map_err(|_| AgentInnerError::Message("malformed queue dh key".into()))?,
        ),
        status: SndQueueStatus::New,
        db_id: 0,
    };

    store.create_snd_conn(&conn_id, snd_queue).await?;
    Ok((conn_id, result, kem_shared_secret))
}

/// Persist the agent-level `HELLO`/application payload for delivery and
/// hand back the bookkeeping the caller needs to build the wire `SEND`: the
/// store-assigned ids plus the [`MsgBody`] the ratchet must actually
/// encrypt, carrying this connection's own `external_snd_id` and the hash
/// chaining back to the previous outbound message.
pub async fn send_message(
    store: &dyn Store,
    locks: &ConnLocks,
    conn_id: &str,
    body: smp_proto::message::AMessage,
) -> Result<(crate::store::SndIdUpdate, smp_proto::message::MsgBody), AgentError> {
    let _guard = locks.lock_all(&[conn_id]).await;
    let conn = store.get_conn(conn_id).await?;
    let snd = conn.snd_queue().ok_or(AgentError::Conn(ConnError::Simplex))?;
    if snd.status == SndQueueStatus::Disabled {
        return Err(AgentError::Agent(AgentInnerError::Prohibited));
    }

    let ids = store.update_snd_ids(conn_id).await?;
    let content_hash = smp_crypto::hash::content_hash(&body.encode());
    let msg_body = smp_proto::message::MsgBody {
        external_snd_id: ids.internal_snd_id,
        previous_msg_hash: ids.previous_hash,
        tag: body,
    };
    let msg = smp_proto::message::OutboundMessage {
        internal_id: ids.internal_id,
        internal_snd_id: ids.internal_snd_id,
        connection_id: conn_id.to_string(),
        ts: 0,
        body: msg_body.tag.clone(),
        content_hash,
    };
    store.create_snd_msg(conn_id, msg).await?;
    Ok((ids, msg_body))
}

/// Accept an inbound `REPLY` (spec.md §4.5): connect to the advertised
/// second queue and upgrade this connection's receive side to duplex.
/// Grounded in [`join_invitation`]'s own send-queue construction, since the
/// responder here plays exactly the role the initiator plays there.
pub async fn accept_reply_queue(
    store: &dyn Store,
    conn_id: &str,
    queue: &smp_proto::message::QueueInfo,
) -> Result<(), AgentError> {
    let snd_auth = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let snd_queue = SndQueue {
        server: queue.server.clone(),
        snd_id: queue.sender_id.clone(),
        snd_private_auth_key: snd_auth,
        e2e_dh_secret: x25519_dalek::PublicKey::from(
            <[u8; 32]>::try_from(queue.dh_public_key.as_slice())
                .map_err(|_| AgentInnerError::Message("malformed queue dh key".into()))?,
        ),
        status: SndQueueStatus::New,
        db_id: 0,
    };
    store.upgrade_rcv_to_duplex(conn_id, snd_queue).await?;
    Ok(())
}

/// Register `conn_id`'s receive queue for push notifications (spec.md §4.7):
/// ask `ntf` to mint credentials against the queue's server and persist them
/// so the caller can wake on a push without holding an open SMP connection.
pub async fn enable_notifications(
    store: &dyn Store,
    ntf: &dyn Ntf,
    conn_id: &str,
) -> Result<(), AgentError> {
    let conn = store.get_conn(conn_id).await?;
    let server = conn.rcv_queue().ok_or(AgentError::Conn(ConnError::Simplex))?.server.clone();
    let creds = ntf.register(&server, conn_id).await?;
    store.set_notifier_creds(conn_id, creds).await?;
    Ok(())
}

/// Suspend a queue: `Active` -> `Disabled`, an `OFF` the caller still owes
/// the relay.
pub async fn suspend(store: &dyn Store, locks: &ConnLocks, conn_id: &str) -> Result<(), AgentError> {
    let _guard = locks.lock_all(&[conn_id]).await;
    let conn = store.get_conn(conn_id).await?;
    match conn {
        Connection::Rcv(_) | Connection::Duplex(_, _) => {
            store.set_rcv_queue_status(conn_id, RcvQueueStatus::Disabled).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Permanently remove a connection and its queues from the store.
pub async fn delete(store: &dyn Store, locks: &ConnLocks, conn_id: &str) -> Result<(), AgentError> {
    let _guard = locks.lock_all(&[conn_id]).await;
    store.delete_conn(conn_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn create_invitation_persists_new_rcv_queue() {
        let store = InMemoryStore::new();
        let identity = IdentityKeyPair::generate().unwrap();
        let locks = ConnLocks::default();

        let (conn_id, cmd, link) =
            create_invitation(&store, &identity, &locks, "smp.example.org", 16, "").await.unwrap();

        assert!(matches!(cmd, Command::New { .. }));
        assert_eq!(link.queues.len(), 1);
        let conn = store.get_conn(&conn_id).await.unwrap();
        assert!(matches!(conn, Connection::Rcv(q) if q.status == RcvQueueStatus::New));
    }

    #[tokio::test]
    async fn send_on_simplex_rcv_connection_is_rejected() {
        let store = InMemoryStore::new();
        let identity = IdentityKeyPair::generate().unwrap();
        let locks = ConnLocks::default();
        let (conn_id, _, _) = create_invitation(&store, &identity, &locks, "smp.example.org", 16, "").await.unwrap();

        let err = send_message(&store, &locks, &conn_id, smp_proto::message::AMessage::Hello).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn send_message_chains_previous_hash_and_sequence() {
        use smp_proto::message::AMessage;

        let store = InMemoryStore::new();
        let identity = IdentityKeyPair::generate().unwrap();
        let locks = ConnLocks::default();
        let (rcv_conn_id, _, link) =
            create_invitation(&store, &identity, &locks, "smp.example.org", 16, "").await.unwrap();
        let peer_identity = IdentityKeyPair::generate().unwrap();
        let (conn_id, _, _) = join_invitation(&store, &peer_identity, &locks, 16, "", &link).await.unwrap();
        store.set_snd_queue_status(&conn_id, SndQueueStatus::Active).await.unwrap();
        let _ = rcv_conn_id;

        let (ids1, body1) = send_message(&store, &locks, &conn_id, AMessage::Hello).await.unwrap();
        assert_eq!(body1.external_snd_id, ids1.internal_snd_id);
        assert_eq!(body1.previous_msg_hash, [0u8; 32]);

        let (ids2, body2) = send_message(&store, &locks, &conn_id, AMessage::AMsg { body: vec![1] }).await.unwrap();
        assert_eq!(body2.external_snd_id, ids2.internal_snd_id);
        assert_ne!(body2.external_snd_id, body1.external_snd_id);
        assert_eq!(body2.previous_msg_hash, smp_crypto::hash::content_hash(&AMessage::Hello.encode()));
    }

    #[tokio::test]
    async fn enable_notifications_persists_creds_from_ntf() {
        struct FakeNtf;
        #[async_trait::async_trait]
        impl Ntf for FakeNtf {
            async fn register(&self, _server: &str, _conn_id: &str) -> Result<NotifierCreds, AgentError> {
                Ok(NotifierCreds { notifier_id: vec![9], notifier_key: vec![10] })
            }
            async fn unregister(&self, _server: &str, _conn_id: &str) -> Result<(), AgentError> {
                Ok(())
            }
        }

        let store = InMemoryStore::new();
        let identity = IdentityKeyPair::generate().unwrap();
        let locks = ConnLocks::default();
        let (conn_id, _, _) = create_invitation(&store, &identity, &locks, "smp.example.org", 16, "").await.unwrap();

        enable_notifications(&store, &FakeNtf, &conn_id).await.unwrap();
        let conn = store.get_conn(&conn_id).await.unwrap();
        assert!(conn.rcv_queue().unwrap().notifier_creds.is_some());
    }

    #[tokio::test]
    async fn lock_all_dedupes_and_sorts() {
        let locks = ConnLocks::default();
        let guards = locks.lock_all(&["b", "a", "a"]).await;
        assert_eq!(guards.len(), 2);
    }
}
