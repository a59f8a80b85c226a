//! Subscription bookkeeping (spec.md §4.6): three disjoint maps — active,
//! pending, removed — per relay server, plus batching of `SUB` rounds.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// A subscription is only ever in one of the three maps at a time for a
/// given `(server, conn_id)` pair.
#[derive(Default)]
struct Maps {
    active: HashMap<String, HashSet<String>>,
    pending: HashMap<String, HashSet<String>>,
    removed: HashMap<String, HashSet<String>>,
}

pub struct SubscriptionStore {
    maps: Mutex<Maps>,
    /// Relay-side cap on queues per `SUB` transmission batch (spec.md §4.6,
    /// "up to 90 queues per round-trip").
    pub batch_size: usize,
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new(90)
    }
}

impl SubscriptionStore {
    pub fn new(batch_size: usize) -> Self {
        Self { maps: Mutex::new(Maps::default()), batch_size }
    }

    pub fn mark_pending(&self, server: &str, conn_id: &str) {
        let mut maps = self.maps.lock();
        maps.active.get_mut(server).map(|s| s.remove(conn_id));
        maps.removed.get_mut(server).map(|s| s.remove(conn_id));
        maps.pending.entry(server.to_string()).or_default().insert(conn_id.to_string());
    }

    pub fn mark_active(&self, server: &str, conn_id: &str) {
        let mut maps = self.maps.lock();
        maps.pending.get_mut(server).map(|s| s.remove(conn_id));
        maps.removed.get_mut(server).map(|s| s.remove(conn_id));
        maps.active.entry(server.to_string()).or_default().insert(conn_id.to_string());
    }

    pub fn mark_removed(&self, server: &str, conn_id: &str) {
        let mut maps = self.maps.lock();
        maps.active.get_mut(server).map(|s| s.remove(conn_id));
        maps.pending.get_mut(server).map(|s| s.remove(conn_id));
        maps.removed.entry(server.to_string()).or_default().insert(conn_id.to_string());
    }

    pub fn is_active(&self, server: &str, conn_id: &str) -> bool {
        self.maps.lock().active.get(server).is_some_and(|s| s.contains(conn_id))
    }

    /// Pending subscriptions for `server`, chunked to `batch_size` per
    /// round-trip.
    pub fn pending_batches(&self, server: &str) -> Vec<Vec<String>> {
        let maps = self.maps.lock();
        let Some(set) = maps.pending.get(server) else { return Vec::new() };
        let mut ids: Vec<String> = set.iter().cloned().collect();
        ids.sort();
        ids.chunks(self.batch_size).map(|c| c.to_vec()).collect()
    }

    pub fn active_count(&self, server: &str) -> usize {
        self.maps.lock().active.get(server).map(|s| s.len()).unwrap_or(0)
    }

    /// Connection ids active on `server`, for moving them to `pending` when
    /// that server's transport session drops.
    pub fn active_conn_ids(&self, server: &str) -> Vec<String> {
        self.maps.lock().active.get(server).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Connection ids pending on `server`, for promoting them to `active`
    /// once a resubscription round succeeds.
    pub fn pending_conn_ids(&self, server: &str) -> Vec<String> {
        self.maps.lock().pending.get(server).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_move_between_disjoint_sets() {
        let store = SubscriptionStore::new(90);
        store.mark_pending("relay1", "c1");
        store.mark_active("relay1", "c1");
        assert!(store.is_active("relay1", "c1"));
        store.mark_removed("relay1", "c1");
        assert!(!store.is_active("relay1", "c1"));
    }

    #[test]
    fn pending_batches_respect_batch_size() {
        let store = SubscriptionStore::new(2);
        for i in 0..5 {
            store.mark_pending("relay1", &format!("c{i}"));
        }
        let batches = store.pending_batches("relay1");
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 2));
    }
}
