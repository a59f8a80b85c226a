//! End-to-end duplex handshake and message-ordering properties (spec.md §8).

use smp_agent::connection_api::{self, ConnLocks};
use smp_agent::inbound::{self, InboundOutcome};
use smp_agent::store::{InMemoryStore, Store};
use smp_crypto::identity::IdentityKeyPair;
use smp_crypto::ratchet::RatchetSession;
use smp_proto::envelope::{ClientMsgEnvelope, PrivateHeader};
use smp_proto::message::{AMessage, Integrity, MsgBody};

/// Alice publishes an invitation; Bob joins it and sends a confirmation
/// envelope; Alice's store ends up with a `Confirmed` queue and a live
/// ratchet session ready to decrypt Bob's first real message.
#[tokio::test]
async fn duplex_handshake_reaches_confirmed_and_first_message() {
    let alice_store = InMemoryStore::new();
    let alice_identity = IdentityKeyPair::generate().unwrap();
    let locks = ConnLocks::default();

    let (alice_conn, _new_cmd, link) =
        connection_api::create_invitation(&alice_store, &alice_identity, &locks, "smp.example.org", 16, "")
            .await
            .unwrap();

    let bob_store = InMemoryStore::new();
    let bob_identity = IdentityKeyPair::generate().unwrap();
    let (_bob_conn, x3dh_result, _kem_shared_secret) =
        connection_api::join_invitation(&bob_store, &bob_identity, &locks, 16, "", &link).await.unwrap();

    let bob_auth_pub = {
        let conn = bob_store.get_conn(&_bob_conn).await.unwrap();
        conn.snd_queue().unwrap().snd_private_auth_key.verifying_key().to_bytes().to_vec()
    };

    let alice_rcv_dh_pub = {
        let conn = alice_store.get_conn(&alice_conn).await.unwrap();
        x25519_dalek::PublicKey::from(&conn.rcv_queue().unwrap().rcv_dh_secret)
    };

    let confirmation = ClientMsgEnvelope {
        header: PrivateHeader::Confirmation(bob_auth_pub),
        payload: serde_json::to_vec(&x3dh_result.header).unwrap(),
    };
    let sealed = confirmation.seal(&alice_rcv_dh_pub).unwrap();

    let conn = alice_store.get_conn(&alice_conn).await.unwrap();
    let rcv_queue = conn.rcv_queue().unwrap().clone();

    let outcome = inbound::process_inbound(&alice_store, &alice_identity, &alice_conn, &conn, &sealed)
        .await
        .unwrap();
    assert!(matches!(outcome, InboundOutcome::Confirmed { .. }));

    let conn = alice_store.get_conn(&alice_conn).await.unwrap();
    assert_eq!(conn.rcv_queue().unwrap().status, smp_agent::queue::RcvQueueStatus::Confirmed);
    assert!(alice_store.load_ratchet(&alice_conn).await.unwrap().is_some());

    // Bob builds his own initiator-side ratchet from the same X3DH result
    // and sends a HELLO; Alice's stored ratchet must decrypt it cleanly.
    let alice_spk_pub = x25519_dalek::PublicKey::from(&rcv_queue.rcv_dh_secret);
    let mut bob_ratchet = RatchetSession::init_alice(
        "sess".into(),
        alice_conn.clone(),
        x3dh_result.shared_key,
        x3dh_result.header_keys.0,
        x3dh_result.header_keys.1,
        &alice_spk_pub,
    )
    .unwrap();

    let hello_body = MsgBody { external_snd_id: 1, previous_msg_hash: [0u8; 32], tag: AMessage::Hello };
    let ct = bob_ratchet.encrypt(&hello_body.encode(), 64).unwrap();
    let envelope = ClientMsgEnvelope { header: PrivateHeader::Empty, payload: ct };
    let sealed = envelope.seal(&alice_rcv_dh_pub).unwrap();

    let conn = alice_store.get_conn(&alice_conn).await.unwrap();
    let outcome = inbound::process_inbound(&alice_store, &alice_identity, &alice_conn, &conn, &sealed)
        .await
        .unwrap();
    match outcome {
        InboundOutcome::Message(msg) => {
            assert_eq!(msg.body, AMessage::Hello);
            assert_eq!(msg.integrity, Integrity::Ok);
        }
        _ => panic!("expected a decrypted message"),
    }
}

#[tokio::test]
async fn link_roundtrips_through_join() {
    let store = InMemoryStore::new();
    let identity = IdentityKeyPair::generate().unwrap();
    let locks = ConnLocks::default();
    let (_conn, _cmd, link) =
        connection_api::create_invitation(&store, &identity, &locks, "smp.example.org", 16, "").await.unwrap();

    let encoded = link.encode().unwrap();
    let decoded = smp_proto::uri::ConnectionLink::decode(&encoded).unwrap();
    assert_eq!(decoded.queues[0].server, "smp.example.org");
}
