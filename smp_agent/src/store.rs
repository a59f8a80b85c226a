//! Store contract (spec.md §6): named, atomic operations. Only an in-memory
//! reference implementation lives here — the production SQLite-backed
//! store is out of scope and is consumed through the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use smp_crypto::ratchet::RatchetSession;

use crate::queue::{Connection, RcvQueue, SndQueue};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection {0} not found")]
    ConnNotFound(String),
    #[error("receive queue not found for (server={0}, rcv_id=...)")]
    RcvQueueNotFound(String),
    #[error("invitation {0} not found")]
    InvitationNotFound(String),
    #[error("connection id {0} already exists")]
    DuplicateConn(String),
    #[error("connection is not in the expected shape for this operation")]
    WrongShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct Invitation {
    pub invitation_id: String,
    pub status: InvitationStatus,
    pub conn_ids: Vec<String>,
}

/// Sequence/hash-chain bookkeeping returned when the caller is about to
/// persist the next received message (spec.md §6).
#[derive(Debug, Clone)]
pub struct RcvIdUpdate {
    pub internal_id: u64,
    pub internal_rcv_id: u64,
    pub prev_ext_snd_id: u64,
    pub prev_rcv_hash: [u8; 32],
}

/// Sequence/hash-chain bookkeeping returned when the caller is about to
/// persist the next sent message (spec.md §6).
#[derive(Debug, Clone)]
pub struct SndIdUpdate {
    pub internal_id: u64,
    pub internal_snd_id: u64,
    pub previous_hash: [u8; 32],
}

/// The named, atomic store operations consumed by the agent runtime
/// (spec.md §6). Every method is one transaction; failures surface as
/// [`StoreError`] (wrapped as `AgentError::Store` by callers).
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_rcv_conn(&self, conn_id: &str, queue: RcvQueue) -> Result<(), StoreError>;
    async fn create_snd_conn(&self, conn_id: &str, queue: SndQueue) -> Result<(), StoreError>;
    async fn upgrade_rcv_to_duplex(&self, conn_id: &str, snd: SndQueue) -> Result<(), StoreError>;
    async fn upgrade_snd_to_duplex(&self, conn_id: &str, rcv: RcvQueue) -> Result<(), StoreError>;

    async fn get_conn(&self, conn_id: &str) -> Result<Connection, StoreError>;
    async fn get_rcv_conn(&self, server: &str, rcv_id: &[u8]) -> Result<(String, Connection), StoreError>;

    async fn set_rcv_queue_status(&self, conn_id: &str, status: crate::queue::RcvQueueStatus) -> Result<(), StoreError>;
    async fn set_snd_queue_status(&self, conn_id: &str, status: crate::queue::SndQueueStatus) -> Result<(), StoreError>;
    async fn set_rcv_queue_active(&self, conn_id: &str, active: bool) -> Result<(), StoreError>;
    async fn set_notifier_creds(&self, conn_id: &str, creds: crate::queue::NotifierCreds) -> Result<(), StoreError>;

    async fn update_rcv_ids(&self, conn_id: &str) -> Result<RcvIdUpdate, StoreError>;
    async fn update_snd_ids(&self, conn_id: &str) -> Result<SndIdUpdate, StoreError>;

    async fn create_rcv_msg(&self, conn_id: &str, msg: smp_proto::message::InboundMessage) -> Result<(), StoreError>;
    async fn create_snd_msg(&self, conn_id: &str, msg: smp_proto::message::OutboundMessage) -> Result<(), StoreError>;

    async fn create_invitation(&self, invitation_id: &str) -> Result<(), StoreError>;
    async fn add_invitation_conn(&self, invitation_id: &str, conn_id: &str) -> Result<(), StoreError>;
    async fn set_invitation_status(&self, invitation_id: &str, status: InvitationStatus) -> Result<(), StoreError>;

    async fn delete_conn(&self, conn_id: &str) -> Result<(), StoreError>;

    /// Persist ratchet state. Must be called in the same logical
    /// transaction as the message row it advanced alongside (spec.md §9).
    async fn save_ratchet(&self, conn_id: &str, ratchet: RatchetSession) -> Result<(), StoreError>;
    async fn load_ratchet(&self, conn_id: &str) -> Result<Option<RatchetSession>, StoreError>;
}

#[derive(Default)]
struct Inner {
    conns: HashMap<String, Connection>,
    rcv_index: HashMap<(String, Vec<u8>), String>,
    invitations: HashMap<String, Invitation>,
    ratchets: HashMap<String, RatchetSession>,
    next_internal_id: HashMap<String, u64>,
    inbound_log: HashMap<String, Vec<smp_proto::message::InboundMessage>>,
    outbound_log: HashMap<String, Vec<smp_proto::message::OutboundMessage>>,
}

/// In-memory reference [`Store`], used by tests and as a template for a
/// durable backend. Not the production persistence layer.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_rcv_conn(&self, conn_id: &str, queue: RcvQueue) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.conns.contains_key(conn_id) {
            return Err(StoreError::DuplicateConn(conn_id.into()));
        }
        inner.rcv_index.insert((queue.server.clone(), queue.rcv_id.clone()), conn_id.to_string());
        inner.conns.insert(conn_id.to_string(), Connection::Rcv(queue));
        Ok(())
    }

    async fn create_snd_conn(&self, conn_id: &str, queue: SndQueue) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.conns.contains_key(conn_id) {
            return Err(StoreError::DuplicateConn(conn_id.into()));
        }
        inner.conns.insert(conn_id.to_string(), Connection::Snd(queue));
        Ok(())
    }

    async fn upgrade_rcv_to_duplex(&self, conn_id: &str, snd: SndQueue) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let conn = inner.conns.get_mut(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        match conn {
            Connection::Rcv(rcv) => {
                *conn = Connection::Duplex(rcv.clone(), snd);
                Ok(())
            }
            _ => Err(StoreError::WrongShape),
        }
    }

    async fn upgrade_snd_to_duplex(&self, conn_id: &str, rcv: RcvQueue) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.rcv_index.insert((rcv.server.clone(), rcv.rcv_id.clone()), conn_id.to_string());
        let conn = inner.conns.get_mut(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        match conn {
            Connection::Snd(snd) => {
                *conn = Connection::Duplex(rcv, snd.clone());
                Ok(())
            }
            _ => Err(StoreError::WrongShape),
        }
    }

    async fn get_conn(&self, conn_id: &str) -> Result<Connection, StoreError> {
        let inner = self.inner.lock().await;
        inner.conns.get(conn_id).cloned().ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))
    }

    async fn get_rcv_conn(&self, server: &str, rcv_id: &[u8]) -> Result<(String, Connection), StoreError> {
        let inner = self.inner.lock().await;
        let conn_id = inner
            .rcv_index
            .get(&(server.to_string(), rcv_id.to_vec()))
            .ok_or_else(|| StoreError::RcvQueueNotFound(server.into()))?
            .clone();
        let conn = inner.conns.get(&conn_id).cloned().ok_or_else(|| StoreError::ConnNotFound(conn_id.clone()))?;
        Ok((conn_id, conn))
    }

    async fn set_rcv_queue_status(&self, conn_id: &str, status: crate::queue::RcvQueueStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let conn = inner.conns.get_mut(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        match conn {
            Connection::Rcv(q) | Connection::Duplex(q, _) => {
                q.status = status;
                Ok(())
            }
            _ => Err(StoreError::WrongShape),
        }
    }

    async fn set_snd_queue_status(&self, conn_id: &str, status: crate::queue::SndQueueStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let conn = inner.conns.get_mut(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        match conn {
            Connection::Snd(q) | Connection::Duplex(_, q) => {
                q.status = status;
                Ok(())
            }
            _ => Err(StoreError::WrongShape),
        }
    }

    async fn set_rcv_queue_active(&self, conn_id: &str, active: bool) -> Result<(), StoreError> {
        use crate::queue::RcvQueueStatus;
        self.set_rcv_queue_status(conn_id, if active { RcvQueueStatus::Active } else { RcvQueueStatus::Disabled }).await
    }

    async fn set_notifier_creds(&self, conn_id: &str, creds: crate::queue::NotifierCreds) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let conn = inner.conns.get_mut(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        match conn {
            Connection::Rcv(q) | Connection::Duplex(q, _) => {
                q.notifier_creds = Some(creds);
                Ok(())
            }
            _ => Err(StoreError::WrongShape),
        }
    }

    async fn update_rcv_ids(&self, conn_id: &str) -> Result<RcvIdUpdate, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.conns.contains_key(conn_id) {
            return Err(StoreError::ConnNotFound(conn_id.into()));
        }
        let counter = inner.next_internal_id.entry(conn_id.to_string()).or_insert(0);
        *counter += 1;
        let internal_id = *counter;
        let log = inner.inbound_log.entry(conn_id.to_string()).or_default();
        let prev_ext_snd_id = log.last().map(|m| m.external_snd_id).unwrap_or(0);
        let prev_rcv_hash = log.last().map(|m| m.content_hash).unwrap_or([0u8; 32]);
        Ok(RcvIdUpdate { internal_id, internal_rcv_id: internal_id, prev_ext_snd_id, prev_rcv_hash })
    }

    async fn update_snd_ids(&self, conn_id: &str) -> Result<SndIdUpdate, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.conns.contains_key(conn_id) {
            return Err(StoreError::ConnNotFound(conn_id.into()));
        }
        let counter = inner.next_internal_id.entry(format!("{conn_id}:snd")).or_insert(0);
        *counter += 1;
        let internal_id = *counter;
        let log = inner.outbound_log.entry(conn_id.to_string()).or_default();
        let previous_hash = log.last().map(|m| m.content_hash).unwrap_or([0u8; 32]);
        Ok(SndIdUpdate { internal_id, internal_snd_id: internal_id, previous_hash })
    }

    async fn create_rcv_msg(&self, conn_id: &str, msg: smp_proto::message::InboundMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.inbound_log.entry(conn_id.to_string()).or_default().push(msg);
        Ok(())
    }

    async fn create_snd_msg(&self, conn_id: &str, msg: smp_proto::message::OutboundMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.outbound_log.entry(conn_id.to_string()).or_default().push(msg);
        Ok(())
    }

    async fn create_invitation(&self, invitation_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.invitations.insert(
            invitation_id.to_string(),
            Invitation { invitation_id: invitation_id.to_string(), status: InvitationStatus::Pending, conn_ids: Vec::new() },
        );
        Ok(())
    }

    async fn add_invitation_conn(&self, invitation_id: &str, conn_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let inv = inner.invitations.get_mut(invitation_id).ok_or_else(|| StoreError::InvitationNotFound(invitation_id.into()))?;
        inv.conn_ids.push(conn_id.to_string());
        Ok(())
    }

    async fn set_invitation_status(&self, invitation_id: &str, status: InvitationStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let inv = inner.invitations.get_mut(invitation_id).ok_or_else(|| StoreError::InvitationNotFound(invitation_id.into()))?;
        inv.status = status;
        Ok(())
    }

    async fn delete_conn(&self, conn_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let conn = inner.conns.remove(conn_id).ok_or_else(|| StoreError::ConnNotFound(conn_id.into()))?;
        if let Some(rcv) = conn.rcv_queue() {
            inner.rcv_index.remove(&(rcv.server.clone(), rcv.rcv_id.clone()));
        }
        inner.ratchets.remove(conn_id);
        Ok(())
    }

    async fn save_ratchet(&self, conn_id: &str, ratchet: RatchetSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ratchets.insert(conn_id.to_string(), ratchet);
        Ok(())
    }

    async fn load_ratchet(&self, conn_id: &str) -> Result<Option<RatchetSession>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.ratchets.get(conn_id).cloned())
    }
}
