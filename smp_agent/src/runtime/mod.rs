//! Agent client runtime (spec.md §4.6, C7): transport sessions, per-server
//! subscriptions, worker restart policy, and the graceful-shutdown
//! operation chain sit here; the per-connection protocol logic lives in
//! [`crate::state_machine`] and [`crate::inbound`].

pub mod dispatch;
pub mod gating;
pub mod subscription;
pub mod worker;

use std::sync::Arc;

use smp_transport::session::{SessionCache, SessionKey};

use crate::config::Config;
use crate::connection_api::{self, ConnLocks};
use crate::error::AgentError;
use crate::store::Store;

use dispatch::{AgentCmd, AgentEvt, Dispatch, OutboundEnvelope};
use gating::OperationGates;
use subscription::SubscriptionStore;

/// Everything the runtime's background tasks share: the transport session
/// cache, subscription bookkeeping, operation gates, and a handle to the
/// store. Cloned cheaply (all fields are `Arc`-backed) into each worker.
pub struct AgentRuntime {
    pub config: Config,
    pub sessions: SessionCache,
    pub subscriptions: SubscriptionStore,
    pub gates: OperationGates,
    pub store: Arc<dyn Store>,
    pub dispatch: Dispatch,
}

impl AgentRuntime {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let sub_batch = 90;
        Self {
            sessions: SessionCache::new(),
            subscriptions: SubscriptionStore::new(sub_batch),
            gates: OperationGates::new(),
            store,
            dispatch: Dispatch::new(),
            config,
        }
    }

    /// Begin the ordered shutdown chain (spec.md §4.6): suspend receive
    /// network activity first, letting delivery/send/database drain in
    /// turn before the runtime reports fully suspended.
    pub fn begin_shutdown(&self) {
        self.gates.begin_shutdown();
    }

    /// Execute one [`AgentCmd`] against the store, producing the
    /// [`AgentEvt`] the dispatch loop reports back to the caller (spec.md
    /// §4.6 C7). This is the `handle` closure [`dispatch::Dispatch::run_one`]
    /// is driven by.
    pub async fn handle_command(
        &self,
        locks: &ConnLocks,
        conn_id: String,
        cmd: AgentCmd,
    ) -> Result<AgentEvt, AgentError> {
        match cmd {
            AgentCmd::Send { body } => {
                let (ids, _msg_body) = connection_api::send_message(self.store.as_ref(), locks, &conn_id, body).await?;
                Ok(AgentEvt::MsgSent { internal_snd_id: ids.internal_snd_id })
            }
            AgentCmd::Subscribe => {
                let conn = self.store.get_conn(&conn_id).await?;
                if let Some(server) = conn.rcv_queue().map(|q| q.server.clone()) {
                    self.subscriptions.mark_pending(&server, &conn_id);
                }
                Ok(AgentEvt::Connected)
            }
            AgentCmd::Suspend => {
                connection_api::suspend(self.store.as_ref(), locks, &conn_id).await?;
                if let Ok(conn) = self.store.get_conn(&conn_id).await {
                    if let Some(server) = conn.rcv_queue().map(|q| q.server.clone()) {
                        self.subscriptions.mark_removed(&server, &conn_id);
                    }
                }
                Ok(AgentEvt::Suspended)
            }
            AgentCmd::Delete => {
                connection_api::delete(self.store.as_ref(), locks, &conn_id).await?;
                Ok(AgentEvt::Deleted)
            }
        }
    }

    /// A transport session dropped (spec.md §3 session cache): evict it from
    /// [`SessionCache`], move every queue that was active on that server
    /// back to `pending`, and report the disconnect. This is
    /// [`smp_transport::session::SessionCache::remove`]'s documented caller
    /// responsibility.
    pub fn on_session_dropped(&self, key: &SessionKey) {
        self.sessions.remove(key);
        for conn_id in self.subscriptions.active_conn_ids(&key.server) {
            self.subscriptions.mark_pending(&key.server, &conn_id);
        }
        let _ = self.dispatch.evt_tx.send(OutboundEnvelope {
            corr_id: 0,
            conn_id: String::new(),
            evt: AgentEvt::Down { server: key.server.clone() },
        });
    }

    /// Re-establish a dropped session and, on success, promote every queue
    /// pending on `server` back to `active`, reporting `Up`. The other half
    /// of [`Self::on_session_dropped`]'s resubscription contract; spawned as
    /// background work since a session reconnect can block on the network.
    pub fn spawn_resubscription<F, Fut>(self: &Arc<Self>, server: String, connect: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), AgentError>> + Send + 'static,
    {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            if connect().await.is_ok() {
                for conn_id in runtime.subscriptions.pending_conn_ids(&server) {
                    runtime.subscriptions.mark_active(&server, &conn_id);
                }
                let _ = runtime.dispatch.evt_tx.send(OutboundEnvelope {
                    corr_id: 0,
                    conn_id: String::new(),
                    evt: AgentEvt::Up { server },
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolServer;
    use crate::store::InMemoryStore;
    use smp_crypto::identity::IdentityKeyPair;

    fn test_config() -> Config {
        let srv = ProtocolServer { scheme: "smp".into(), hosts: vec!["relay.example.org".into()], port: 5223, key_hash: [0u8; 32] };
        Config::new(vec![srv]).unwrap()
    }

    #[tokio::test]
    async fn subscribe_marks_queue_pending_for_its_server() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = AgentRuntime::new(test_config(), store.clone());
        let identity = IdentityKeyPair::generate().unwrap();
        let locks = ConnLocks::default();
        let (conn_id, _cmd, _link) =
            connection_api::create_invitation(store.as_ref(), &identity, &locks, "smp.example.org", 16, "")
                .await
                .unwrap();

        let evt = runtime.handle_command(&locks, conn_id.clone(), AgentCmd::Subscribe).await.unwrap();
        assert!(matches!(evt, AgentEvt::Connected));
        assert!(runtime.subscriptions.pending_conn_ids("smp.example.org").contains(&conn_id));
    }

    #[test]
    fn session_drop_moves_active_queues_to_pending_and_reports_down() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = AgentRuntime::new(test_config(), store);
        runtime.subscriptions.mark_active("smp.example.org", "c1");

        let key = SessionKey { user_id: "default".into(), server: "smp.example.org".into(), entity_id: None };
        runtime.on_session_dropped(&key);

        assert!(!runtime.subscriptions.is_active("smp.example.org", "c1"));
        assert!(runtime.subscriptions.pending_conn_ids("smp.example.org").contains(&"c1".to_string()));
    }
}
