// turing-core/src/services/pending.rs
//! Registry of in-flight delayed-commit units.
//!
//! Each admitted message gets one entry keyed by (channel, user, message) and
//! holding a cancellation token. A later ban cancels every entry for the
//! (channel, user) pair; a later deletion cancels the entry for the
//! (channel, message) pair. Both lookups go through secondary indexes.
//!
//! Entries are removed only by dropping the [`PendingGuard`] returned from
//! [`PendingWrites::register`], so removal happens on every exit path of the
//! unit, including cancellation and task abort.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::events::{MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub channel: String,
    pub user: UserId,
    pub message: MessageId,
}

impl PendingKey {
    pub fn new(channel: impl Into<String>, user: UserId, message: MessageId) -> Self {
        Self {
            channel: channel.into(),
            user,
            message,
        }
    }
}

struct Entry {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<PendingKey, Entry>,
    by_message: HashMap<(String, MessageId), PendingKey>,
    by_user: HashMap<(String, UserId), HashSet<MessageId>>,
    next_id: u64,
}

#[derive(Default)]
pub struct PendingWrites {
    tables: Mutex<Tables>,
    drained: Notify,
}

impl PendingWrites {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a unit for `key`. Returns `None` if the message id is
    /// already pending in this channel (duplicate delivery).
    pub fn register(self: &Arc<Self>, key: PendingKey) -> Option<PendingGuard> {
        let mut t = self.lock();
        let msg_key = (key.channel.clone(), key.message.clone());
        if t.by_message.contains_key(&msg_key) {
            return None;
        }
        let id = t.next_id;
        t.next_id += 1;
        let token = CancellationToken::new();
        t.by_message.insert(msg_key, key.clone());
        t.by_user
            .entry((key.channel.clone(), key.user.clone()))
            .or_default()
            .insert(key.message.clone());
        t.entries.insert(
            key.clone(),
            Entry {
                id,
                token: token.clone(),
            },
        );
        Some(PendingGuard {
            registry: Arc::clone(self),
            key,
            id,
            token,
        })
    }

    /// Cancel every pending unit for `user` in `channel`. Returns how many
    /// entries were signalled.
    pub fn cancel_user(&self, channel: &str, user: &UserId) -> usize {
        let t = self.lock();
        let Some(messages) = t.by_user.get(&(channel.to_string(), user.clone())) else {
            return 0;
        };
        let mut n = 0;
        for message in messages {
            let key = PendingKey::new(channel, user.clone(), message.clone());
            if let Some(entry) = t.entries.get(&key) {
                entry.token.cancel();
                n += 1;
            }
        }
        n
    }

    /// Cancel the pending unit for `message` in `channel`, if any.
    pub fn cancel_message(&self, channel: &str, message: &MessageId) -> bool {
        let t = self.lock();
        let Some(key) = t.by_message.get(&(channel.to_string(), message.clone())) else {
            return false;
        };
        match t.entries.get(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let t = self.lock();
        for entry in t.entries.values() {
            entry.token.cancel();
        }
        t.entries.len()
    }

    pub fn contains(&self, channel: &str, message: &MessageId) -> bool {
        self.lock()
            .by_message
            .contains_key(&(channel.to_string(), message.clone()))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once no entry is registered.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, key: &PendingKey, id: u64) {
        let now_empty = {
            let mut t = self.lock();
            if t.entries.get(key).map(|e| e.id) != Some(id) {
                return;
            }
            t.entries.remove(key);
            t.by_message
                .remove(&(key.channel.clone(), key.message.clone()));
            let user_key = (key.channel.clone(), key.user.clone());
            if let Some(set) = t.by_user.get_mut(&user_key) {
                set.remove(&key.message);
                if set.is_empty() {
                    t.by_user.remove(&user_key);
                }
            }
            t.entries.is_empty()
        };
        if now_empty {
            self.drained.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped registration. Dropping it unregisters the unit.
pub struct PendingGuard {
    registry: Arc<PendingWrites>,
    key: PendingKey,
    id: u64,
    token: CancellationToken,
}

impl PendingGuard {
    pub fn key(&self) -> &PendingKey {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(channel: &str, user: &str, message: &str) -> PendingKey {
        PendingKey::new(channel, UserId::from(user), MessageId::from(message))
    }

    #[test]
    fn one_entry_per_message_id() {
        let reg = PendingWrites::new();
        let g = reg.register(key("x", "1", "m1")).expect("first registration");
        assert!(reg.register(key("x", "2", "m1")).is_none());
        let other = reg.register(key("y", "1", "m1"));
        assert!(other.is_some(), "message ids are scoped per channel");
        drop(other);
        drop(g);
        assert!(reg.is_empty());
    }

    #[test]
    fn ban_cancels_only_that_users_units() {
        let reg = PendingWrites::new();
        let a = reg.register(key("x", "1", "m1")).unwrap();
        let b = reg.register(key("x", "1", "m2")).unwrap();
        let c = reg.register(key("x", "2", "m3")).unwrap();
        let d = reg.register(key("y", "1", "m4")).unwrap();

        assert_eq!(reg.cancel_user("x", &UserId::from("1")), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(!c.is_cancelled() && !d.is_cancelled());
    }

    #[test]
    fn censor_cancels_single_unit() {
        let reg = PendingWrites::new();
        let a = reg.register(key("x", "1", "m1")).unwrap();
        let b = reg.register(key("x", "1", "m2")).unwrap();
        assert!(reg.cancel_message("x", &MessageId::from("m2")));
        assert!(!a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn cancel_after_completion_is_a_no_op() {
        let reg = PendingWrites::new();
        let g = reg.register(key("x", "1", "m1")).unwrap();
        drop(g);
        assert!(!reg.cancel_message("x", &MessageId::from("m1")));
        assert_eq!(reg.cancel_user("x", &UserId::from("1")), 0);
        assert!(!reg.contains("x", &MessageId::from("m1")));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_drained_resolves_after_last_guard_drops() {
        let reg = PendingWrites::new();
        let g1 = reg.register(key("x", "1", "m1")).unwrap();
        let g2 = reg.register(key("x", "1", "m2")).unwrap();

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(g1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(g2);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drained")
            .unwrap();
    }
}
