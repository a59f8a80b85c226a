//! Queues and connections (spec.md §3 Data model, §4.5 queue state machine).

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Recipient-view queue lifecycle (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcvQueueStatus {
    New,
    Confirmed,
    Secured,
    Active,
    Disabled,
}

/// Sender-view queue lifecycle (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SndQueueStatus {
    New,
    Confirmed,
    Active,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct NotifierCreds {
    pub notifier_id: Vec<u8>,
    pub notifier_key: Vec<u8>,
}

/// `{user_id, conn_id, server, rcv_id, snd_id, rcv_private_auth_key,
/// rcv_dh_secret, e2e_priv_key, e2e_dh_secret?, status, notifier_creds?,
/// primary, db_id}` (spec.md §3).
#[derive(Clone)]
pub struct RcvQueue {
    pub user_id: String,
    pub conn_id: String,
    pub server: String,
    pub rcv_id: Vec<u8>,
    pub snd_id: Vec<u8>,
    pub rcv_private_auth_key: ed25519_dalek::SigningKey,
    pub rcv_dh_secret: StaticSecret,
    pub e2e_priv_key: StaticSecret,
    pub e2e_dh_secret: Option<X25519Public>,
    pub status: RcvQueueStatus,
    pub notifier_creds: Option<NotifierCreds>,
    pub primary: bool,
    pub db_id: u64,
    /// Our half of a proposed hybrid-KEM keypair (spec.md §4.4.2), kept
    /// until the peer's confirmation returns a ciphertext to decapsulate.
    /// Always `None` when built without the `pq` feature.
    pub kem_secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for RcvQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcvQueue")
            .field("conn_id", &self.conn_id)
            .field("server", &self.server)
            .field("status", &self.status)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}

/// `{server, snd_id, snd_private_auth_key, e2e_dh_secret, status, db_id}`
/// (spec.md §3).
#[derive(Clone)]
pub struct SndQueue {
    pub server: String,
    pub snd_id: Vec<u8>,
    pub snd_private_auth_key: ed25519_dalek::SigningKey,
    pub e2e_dh_secret: X25519Public,
    pub status: SndQueueStatus,
    pub db_id: u64,
}

impl std::fmt::Debug for SndQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SndQueue")
            .field("server", &self.server)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// A connection: `Rcv(queue)`, `Snd(queue)`, `Duplex(rcv, snd)`, or a
/// pending contact request (spec.md §3). Invariant: a duplex connection's
/// send and receive queues address disjoint relay queues.
#[derive(Debug, Clone)]
pub enum Connection {
    Rcv(RcvQueue),
    Snd(SndQueue),
    Duplex(RcvQueue, SndQueue),
    ContactRequest { invitation_id: String },
}

impl Connection {
    pub fn is_duplex(&self) -> bool {
        matches!(self, Connection::Duplex(_, _))
    }

    pub fn rcv_queue(&self) -> Option<&RcvQueue> {
        match self {
            Connection::Rcv(q) | Connection::Duplex(q, _) => Some(q),
            _ => None,
        }
    }

    pub fn snd_queue(&self) -> Option<&SndQueue> {
        match self {
            Connection::Snd(q) | Connection::Duplex(_, q) => Some(q),
            _ => None,
        }
    }
}
