//! In-memory conversation store.
//!
//! One `Mutex` per conversation inside a sharded map: writers on different
//! conversations never contend, writers on the same conversation are
//! serialized. Operations are synchronous and never hold a lock across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::conversation::{
    ConversationContext, ConversationId, MessageSnapshot, MAX_HISTORY_MESSAGES,
};
use crate::errors::StoreError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSettings {
    pub max_messages: usize,
    pub idle_ttl: Duration,
    pub max_conversations: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_messages: MAX_HISTORY_MESSAGES,
            idle_ttl: Duration::from_secs(3_600),
            max_conversations: 10_000,
        }
    }
}

type Entry = Arc<Mutex<ConversationContext>>;

#[derive(Debug, Default)]
pub struct ConversationStore {
    entries: DashMap<ConversationId, Entry>,
    settings: StoreSettings,
}

impl ConversationStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self { entries: DashMap::new(), settings }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Returns a snapshot of the conversation, creating it when absent.
    pub fn get_or_create(
        &self,
        id: &ConversationId,
        user_id: Option<&str>,
    ) -> Result<ConversationContext, StoreError> {
        let now = Utc::now();
        let (entry, created) = {
            let mut created = false;
            let entry = self
                .entries
                .entry(id.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Mutex::new(ConversationContext::with_message_cap(
                        id.clone(),
                        user_id.map(str::to_string),
                        now,
                        self.settings.max_messages,
                    )))
                })
                .clone();
            (entry, created)
        };

        if created {
            tracing::debug!(
                event_name = "conversation.created",
                correlation_id = %id,
                "conversation created"
            );
            self.enforce_capacity(id);
        }

        let mut context = lock(&entry, id)?;
        context.touch(now);
        Ok(context.clone())
    }

    pub fn get(&self, id: &ConversationId) -> Result<Option<ConversationContext>, StoreError> {
        let Some(entry) = self.entry(id) else {
            return Ok(None);
        };
        let context = lock(&entry, id)?;
        Ok(Some(context.clone()))
    }

    pub fn append(&self, id: &ConversationId, message: MessageSnapshot) -> Result<(), StoreError> {
        self.update(id, |context| context.push_message(message))
    }

    /// Applies `mutate` under the conversation's lock.
    pub fn update<T>(
        &self,
        id: &ConversationId,
        mutate: impl FnOnce(&mut ConversationContext) -> T,
    ) -> Result<T, StoreError> {
        let entry = self.entry(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut context = lock(&entry, id)?;
        Ok(mutate(&mut context))
    }

    /// Applies `mutate` to the stored conversation, first restoring it from
    /// `base` when it was evicted since `base` was read.
    pub fn commit<T>(
        &self,
        base: &ConversationContext,
        mutate: impl FnOnce(&mut ConversationContext) -> T,
    ) -> Result<T, StoreError> {
        let id = &base.id;
        let (entry, restored) = {
            let mut restored = false;
            let entry = self
                .entries
                .entry(id.clone())
                .or_insert_with(|| {
                    restored = true;
                    Arc::new(Mutex::new(base.clone()))
                })
                .clone();
            (entry, restored)
        };

        if restored {
            tracing::info!(
                event_name = "conversation.restored",
                correlation_id = %id,
                "conversation evicted mid-turn, restored from turn snapshot"
            );
            self.enforce_capacity(id);
        }

        let mut context = lock(&entry, id)?;
        Ok(mutate(&mut context))
    }

    pub fn remove(&self, id: &ConversationId) -> Option<ConversationContext> {
        let (_, entry) = self.entries.remove(id)?;
        let context = entry.lock().ok()?;
        Some(context.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops conversations idle for longer than the configured TTL.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.settings.idle_ttl) else {
            return 0;
        };
        let cutoff = now - ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.try_lock() {
            Ok(context) => context.last_activity_at() >= cutoff,
            // Busy or poisoned entries are kept; a busy one is by definition active.
            Err(_) => true,
        });
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::info!(
                event_name = "conversation.evicted_idle",
                evicted,
                remaining = self.entries.len(),
                "evicted idle conversations"
            );
        }
        evicted
    }

    fn entry(&self, id: &ConversationId) -> Option<Entry> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the least recently active conversations above capacity,
    /// sparing the one just created.
    fn enforce_capacity(&self, keep: &ConversationId) {
        let max = self.settings.max_conversations.max(1);
        let excess = self.entries.len().saturating_sub(max);
        if excess == 0 {
            return;
        }

        let mut candidates = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .filter_map(|entry| {
                let activity = entry.value().try_lock().ok()?.last_activity_at();
                Some((entry.key().clone(), activity))
            })
            .collect::<Vec<_>>();
        candidates.sort_by_key(|(_, activity)| *activity);

        for (id, _) in candidates.into_iter().take(excess) {
            self.entries.remove(&id);
            tracing::debug!(
                event_name = "conversation.evicted_capacity",
                correlation_id = %id,
                "conversation evicted over capacity"
            );
        }
    }
}

fn lock<'a>(
    entry: &'a Mutex<ConversationContext>,
    id: &ConversationId,
) -> Result<MutexGuard<'a, ConversationContext>, StoreError> {
    entry.lock().map_err(|_| StoreError::Poisoned(id.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;

    use super::{ConversationStore, StoreSettings};
    use crate::domain::conversation::{ConversationId, MessageSnapshot};
    use crate::errors::StoreError;

    fn store(max_conversations: usize) -> ConversationStore {
        ConversationStore::new(StoreSettings {
            max_messages: 20,
            idle_ttl: Duration::from_secs(60),
            max_conversations,
        })
    }

    #[test]
    fn get_or_create_returns_existing_conversation() -> Result<(), StoreError> {
        let store = store(10);
        let id = ConversationId::from("conv-1");

        let created = store.get_or_create(&id, Some("U1"))?;
        store.append(&id, MessageSnapshot::user("hello"))?;
        let fetched = store.get_or_create(&id, Some("U2"))?;

        assert_eq!(created.started_at, fetched.started_at);
        assert_eq!(fetched.user_id.as_deref(), Some("U1"));
        assert_eq!(fetched.messages().len(), 1);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn append_to_unknown_conversation_is_not_found() {
        let store = store(10);
        let result = store.append(&ConversationId::from("missing"), MessageSnapshot::user("hi"));
        assert_eq!(result, Err(StoreError::NotFound("missing".to_string())));
    }

    #[test]
    fn snapshots_are_detached_from_stored_state() -> Result<(), StoreError> {
        let store = store(10);
        let id = ConversationId::from("conv-2");
        let mut snapshot = store.get_or_create(&id, None)?;
        snapshot.push_message(MessageSnapshot::user("local only"));

        let stored = store.get(&id)?.map(|context| context.messages().len());
        assert_eq!(stored, Some(0));
        Ok(())
    }

    #[test]
    fn idle_conversations_are_evicted() -> Result<(), StoreError> {
        let store = store(10);
        store.get_or_create(&ConversationId::from("stale"), None)?;

        assert_eq!(store.evict_idle(Utc::now()), 0);
        assert_eq!(store.evict_idle(Utc::now() + chrono::Duration::seconds(120)), 1);
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn capacity_evicts_least_recently_active() -> Result<(), StoreError> {
        let store = store(2);
        let first = ConversationId::from("first");
        let second = ConversationId::from("second");
        store.get_or_create(&first, None)?;
        store.get_or_create(&second, None)?;
        store.update(&second, |context| context.touch(Utc::now() + chrono::Duration::seconds(5)))?;

        store.get_or_create(&ConversationId::from("third"), None)?;

        assert_eq!(store.len(), 2);
        assert!(store.get(&first)?.is_none());
        assert!(store.get(&second)?.is_some());
        Ok(())
    }

    #[test]
    fn get_or_create_refreshes_activity() -> Result<(), StoreError> {
        let store = store(10);
        let id = ConversationId::from("active");
        let created = store.get_or_create(&id, None)?;
        thread::sleep(Duration::from_millis(5));

        let fetched = store.get_or_create(&id, None)?;
        assert!(fetched.last_activity_at() > created.last_activity_at());
        Ok(())
    }

    #[test]
    fn commit_restores_a_conversation_evicted_mid_turn() -> Result<(), StoreError> {
        let store = store(1);
        let first = ConversationId::from("first");
        store.get_or_create(&first, None)?;
        store.append(&first, MessageSnapshot::user("earlier question"))?;
        let base = store.get_or_create(&first, None)?;

        store.get_or_create(&ConversationId::from("second"), None)?;
        assert!(store.get(&first)?.is_none());

        let count = store.commit(&base, |context| {
            context.push_message(MessageSnapshot::user("follow-up"));
            context.messages().len()
        })?;

        assert_eq!(count, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&first)?.is_some());
        Ok(())
    }

    #[test]
    fn commit_keeps_writes_made_by_other_turns() -> Result<(), StoreError> {
        let store = store(10);
        let id = ConversationId::from("shared");
        let base = store.get_or_create(&id, None)?;
        store.append(&id, MessageSnapshot::user("from another turn"))?;

        store.commit(&base, |context| context.push_message(MessageSnapshot::user("mine")))?;

        let stored = store.get(&id)?.map(|context| context.messages().len());
        assert_eq!(stored, Some(2));
        Ok(())
    }

    #[test]
    fn concurrent_appends_on_distinct_conversations_do_not_interfere() {
        let store = Arc::new(store(100));
        let handles = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let id = ConversationId::from(format!("conv-{worker}"));
                    store.get_or_create(&id, None)?;
                    for index in 0..10 {
                        store.append(&id, MessageSnapshot::user(format!("{worker}-{index}")))?;
                    }
                    Ok::<_, StoreError>(())
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(matches!(handle.join(), Ok(Ok(()))));
        }
        for worker in 0..8 {
            let id = ConversationId::from(format!("conv-{worker}"));
            let count = store.get(&id).ok().flatten().map(|context| context.messages().len());
            assert_eq!(count, Some(10));
        }
    }
}
