//! Transport session cache (spec.md §3 "Transport session key", §9 design
//! notes): a one-shot-fill cell per `(user_id, server, entity_id?)`, so
//! concurrent callers needing the same session share one connect attempt
//! instead of racing to open duplicate TCP+TLS connections.
//!
//! Sharded by key hash rather than behind one global lock, per the original
//! design notes ("avoid a global lock; shard by session key").

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::client::SmpClient;
use crate::error::TransportError;

const SHARD_COUNT: usize = 16;

/// Multiplexing granularity for transport sessions (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub server: String,
    pub entity_id: Option<String>,
}

enum Slot {
    Filling(Arc<Notify>),
    Filled(Result<Arc<Mutex<SmpClient>>, Arc<TransportError>>),
}

/// Per-server session cache. The session variable pattern: the first caller
/// for a key inserts a `Filling` slot and connects; subsequent callers await
/// the same slot's `Notify` and read the resolved outcome once filled.
pub struct SessionCache {
    shards: Vec<Mutex<HashMap<SessionKey, Slot>>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self { shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn shard_for(&self, key: &SessionKey) -> &Mutex<HashMap<SessionKey, Slot>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Resolve `key` to a connected client, connecting at most once per key
    /// even under concurrent callers. `connect` is only invoked by whichever
    /// caller wins the race to fill the slot.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: &SessionKey,
        connect_timeout: Duration,
        connect: F,
    ) -> Result<Arc<Mutex<SmpClient>>, Arc<TransportError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SmpClient, TransportError>>,
    {
        let shard = self.shard_for(key);
        let wait_on = {
            let mut map = shard.lock();
            match map.get(key) {
                Some(Slot::Filled(outcome)) => return outcome.clone(),
                Some(Slot::Filling(notify)) => Some(notify.clone()),
                None => {
                    let notify = Arc::new(Notify::new());
                    map.insert(key.clone(), Slot::Filling(notify));
                    None
                }
            }
        };

        if let Some(notify) = wait_on {
            notify.notified().await;
            let map = shard.lock();
            return match map.get(key) {
                Some(Slot::Filled(outcome)) => outcome.clone(),
                _ => Err(Arc::new(TransportError::Unexpected { host: key.server.clone() })),
            };
        }

        let outcome = match timeout(connect_timeout, connect()).await {
            Ok(Ok(client)) => Ok(Arc::new(Mutex::new(client))),
            Ok(Err(e)) => {
                warn!(server = %key.server, error = %e, "transport session connect failed");
                Err(Arc::new(e))
            }
            Err(_) => Err(Arc::new(TransportError::Timeout { host: key.server.clone() })),
        };

        let notify = {
            let mut map = shard.lock();
            let notify = match map.get(key) {
                Some(Slot::Filling(n)) => n.clone(),
                _ => Arc::new(Notify::new()),
            };
            map.insert(key.clone(), Slot::Filled(outcome.clone()));
            notify
        };
        notify.notify_waiters();
        info!(server = %key.server, ok = outcome.is_ok(), "transport session filled");
        outcome
    }

    /// Drop a session on disconnect. The caller (agent runtime) is
    /// responsible for moving that session's queues from `active` to
    /// `pending` and spawning a resubscription worker.
    pub fn remove(&self, key: &SessionKey) {
        self.shard_for(key).lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_distribute_across_keys() {
        let cache = SessionCache::new();
        let k1 = SessionKey { user_id: "u1".into(), server: "smp1.example.org".into(), entity_id: None };
        let k2 = SessionKey { user_id: "u2".into(), server: "smp2.example.org".into(), entity_id: None };
        // Just exercise the hashing path without panicking.
        let _ = cache.shard_for(&k1);
        let _ = cache.shard_for(&k2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let cache = SessionCache::new();
        let key = SessionKey { user_id: "u".into(), server: "smp.example.org".into(), entity_id: None };
        let connect_count = Arc::new(AtomicUsize::new(0));

        // Two callers racing for the same key should only attempt one real
        // connect; we can't construct a real SmpClient without a socket, so
        // this only exercises the slot bookkeeping via an always-erroring
        // connect function.
        let cc = connect_count.clone();
        let fut1 = cache.get_or_connect(&key, Duration::from_millis(50), || async move {
            cc.fetch_add(1, Ordering::SeqCst);
            Err::<SmpClient, _>(TransportError::Host { host: "smp.example.org".into() })
        });
        let result = fut1.await;
        assert!(result.is_err());
        assert_eq!(connect_count.load(Ordering::SeqCst), 1);
    }
}
