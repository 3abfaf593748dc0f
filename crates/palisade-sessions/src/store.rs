use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use tracing::debug;

use palisade_core::config::ConversationConfig;
use palisade_core::types::ConversationId;

use crate::error::{Result, StoreError};
use crate::types::{Conversation, Turn, TurnRole};

/// In-memory conversation store.
///
/// One mutex guards the whole map; every operation completes without
/// awaiting, so contention stays negligible next to model calls. Turn
/// lists are owned exclusively here — callers get snapshots, and the
/// orchestrator lands both halves of an exchange through [`append`],
/// which is atomic relative to any concurrent snapshot read.
///
/// [`append`]: ConversationStore::append
#[derive(Debug)]
pub struct ConversationStore {
    inner: Mutex<Inner>,
    cfg: ConversationConfig,
}

#[derive(Debug)]
struct Inner {
    map: HashMap<String, Conversation>,
    /// Conversation ids with a request currently in flight. A second
    /// request on the same id is rejected, not queued.
    busy: HashSet<String>,
}

/// RAII lease on a conversation id. Dropping it releases the busy mark on
/// every exit path — success, refusal, timeout, panic unwind.
#[derive(Debug)]
pub struct ConversationLease {
    store: Arc<ConversationStore>,
    id: ConversationId,
}

impl ConversationLease {
    pub fn id(&self) -> &ConversationId {
        &self.id
    }
}

impl Drop for ConversationLease {
    fn drop(&mut self) {
        let mut inner = self.store.inner.lock().unwrap();
        inner.busy.remove(self.id.as_str());
    }
}

impl ConversationStore {
    pub fn new(cfg: ConversationConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                busy: HashSet::new(),
            }),
            cfg,
        }
    }

    /// Look up or create a conversation, mark it busy, and return a lease
    /// plus a snapshot of its current state.
    ///
    /// An expired conversation is swept here (lazy sweep) and replaced by
    /// a fresh record under the same id, so a returning client keeps its
    /// id but never resurrects stale history.
    pub fn checkout(
        self: &Arc<Self>,
        requested: Option<&str>,
    ) -> Result<(ConversationLease, Conversation)> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(self.cfg.ttl_seconds as i64);

        let id = match requested {
            Some(id) => ConversationId::from(id),
            None => ConversationId::new(),
        };

        if inner.busy.contains(id.as_str()) {
            return Err(StoreError::Busy { id: id.to_string() });
        }

        let expired = inner
            .map
            .get(id.as_str())
            .map(|c| now - c.last_activity > ttl)
            .unwrap_or(false);
        if expired {
            debug!(conversation = %id, "sweeping expired conversation on access");
            inner.map.remove(id.as_str());
        }

        if !inner.map.contains_key(id.as_str()) {
            Self::evict_if_full(&mut inner, self.cfg.max_conversations);
            inner
                .map
                .insert(id.to_string(), Conversation::new(id.clone()));
        }

        let snapshot = inner.map.get(id.as_str()).cloned().expect("just inserted");
        inner.busy.insert(id.to_string());

        Ok((
            ConversationLease {
                store: Arc::clone(self),
                id,
            },
            snapshot,
        ))
    }

    /// Atomically append one user and one assistant turn, bump activity,
    /// and trim oldest exchange pairs beyond the user-turn cap.
    ///
    /// Both turns land or neither — failure paths in the pipeline never
    /// call this, so a refused request leaves the conversation untouched.
    pub fn append(&self, id: &ConversationId, user: Turn, assistant: Turn) -> Result<()> {
        debug_assert_eq!(user.role, TurnRole::User);
        debug_assert_eq!(assistant.role, TurnRole::Assistant);

        let mut inner = self.inner.lock().unwrap();
        let conv = inner
            .map
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        conv.turns.push(user);
        conv.turns.push(assistant);
        conv.turn_counter += 1;
        conv.last_activity = Utc::now();

        // Turns alternate strictly, so trimming whole pairs from the front
        // keeps both the cap and the alternation invariant.
        while conv.user_turns() > self.cfg.max_turns {
            conv.turns.drain(..2.min(conv.turns.len()));
        }

        Ok(())
    }

    /// Evict every expired conversation. Run periodically; the lazy sweep
    /// in [`checkout`] covers ids that are actually touched.
    ///
    /// [`checkout`]: ConversationStore::checkout
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(self.cfg.ttl_seconds as i64);
        let before = inner.map.len();
        let busy = inner.busy.clone();
        inner
            .map
            .retain(|id, c| busy.contains(id) || now - c.last_activity <= ttl);
        before - inner.map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only snapshot for tests and diagnostics.
    pub fn snapshot(&self, id: &str) -> Option<Conversation> {
        self.inner.lock().unwrap().map.get(id).cloned()
    }

    fn evict_if_full(inner: &mut Inner, cap: usize) {
        if inner.map.len() < cap {
            return;
        }
        // LRU: drop the least-recently-active conversation that is not in
        // flight right now.
        let victim = inner
            .map
            .values()
            .filter(|c| !inner.busy.contains(c.id.as_str()))
            .min_by_key(|c| c.last_activity)
            .map(|c| c.id.to_string());
        if let Some(victim) = victim {
            debug!(conversation = %victim, "evicting LRU conversation at capacity");
            inner.map.remove(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_core::types::Domain;

    fn store_with(cfg: ConversationConfig) -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(cfg))
    }

    fn small_cfg() -> ConversationConfig {
        ConversationConfig {
            max_turns: 3,
            ttl_seconds: 1800,
            max_history_tokens: 4000,
            max_conversations: 2,
        }
    }

    fn exchange(n: usize) -> (Turn, Turn) {
        (
            Turn::user(format!("question {n}")),
            Turn::assistant(format!("answer {n}"), Domain::Meta, 5),
        )
    }

    #[test]
    fn checkout_creates_and_returns_snapshot() {
        let store = store_with(small_cfg());
        let (lease, snap) = store.checkout(None).unwrap();
        assert!(snap.turns.is_empty());
        assert_eq!(snap.id, *lease.id());
    }

    #[test]
    fn append_grows_by_exactly_one_exchange() {
        let store = store_with(small_cfg());
        let (lease, _) = store.checkout(None).unwrap();
        let (u, a) = exchange(1);
        store.append(lease.id(), u, a).unwrap();
        let snap = store.snapshot(lease.id().as_str()).unwrap();
        assert_eq!(snap.turns.len(), 2);
        assert_eq!(snap.user_turns(), 1);
        assert_eq!(snap.turn_counter, 1);
    }

    #[test]
    fn user_turn_cap_trims_oldest_pairs() {
        let store = store_with(small_cfg());
        let (lease, _) = store.checkout(None).unwrap();
        for n in 0..5 {
            let (u, a) = exchange(n);
            store.append(lease.id(), u, a).unwrap();
        }
        let snap = store.snapshot(lease.id().as_str()).unwrap();
        assert_eq!(snap.user_turns(), 3);
        // Oldest exchanges are gone; the newest survives.
        assert!(snap.turns.last().unwrap().content.contains("answer 4"));
        assert!(snap.turns.first().unwrap().content.contains("question 2"));
        // Counter is cumulative, unaffected by trimming.
        assert_eq!(snap.turn_counter, 5);
    }

    #[test]
    fn second_checkout_on_same_id_is_rejected() {
        let store = store_with(small_cfg());
        let (lease, _) = store.checkout(None).unwrap();
        let err = store.checkout(Some(lease.id().as_str())).unwrap_err();
        assert!(matches!(err, StoreError::Busy { .. }));
    }

    #[test]
    fn dropping_lease_releases_the_id() {
        let store = store_with(small_cfg());
        let id = {
            let (lease, _) = store.checkout(None).unwrap();
            lease.id().to_string()
        };
        assert!(store.checkout(Some(&id)).is_ok());
    }

    #[test]
    fn expired_conversation_loses_history_on_access() {
        let mut cfg = small_cfg();
        cfg.ttl_seconds = 0; // everything is expired immediately
        let store = store_with(cfg);
        let id = {
            let (lease, _) = store.checkout(None).unwrap();
            let (u, a) = exchange(1);
            store.append(lease.id(), u, a).unwrap();
            lease.id().to_string()
        };
        let (_lease, snap) = store.checkout(Some(&id)).unwrap();
        assert!(snap.turns.is_empty());
    }

    #[test]
    fn sweep_evicts_expired_conversations() {
        let mut cfg = small_cfg();
        cfg.ttl_seconds = 0;
        let store = store_with(cfg);
        for _ in 0..2 {
            let _ = store.checkout(None).unwrap();
        }
        assert_eq!(store.len(), 2);
        let removed = store.sweep();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_active() {
        let store = store_with(small_cfg()); // cap 2
        let first = {
            let (lease, _) = store.checkout(None).unwrap();
            lease.id().to_string()
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = {
            let (lease, _) = store.checkout(None).unwrap();
            let (u, a) = exchange(1);
            store.append(lease.id(), u, a).unwrap();
            lease.id().to_string()
        };
        // Third checkout exceeds capacity; `first` is the LRU victim.
        let _ = store.checkout(None).unwrap();
        assert!(store.snapshot(&first).is_none());
        assert!(store.snapshot(&second).is_some());
    }
}
