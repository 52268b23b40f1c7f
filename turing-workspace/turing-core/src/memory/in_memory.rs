// turing-core/src/memory/in_memory.rs
//! Process-local [`MessageStore`] with the same filtering rules as SQLite.
//! Used for dry runs and by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::StoreError;
use crate::memory::store::{BanRecord, MessageRecord, MessageStore};

#[derive(Default)]
struct Rows {
    messages: Vec<MessageRecord>,
    bans: Vec<BanRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Rows>,
    loads: AtomicUsize,
    fail_inserts: AtomicUsize,
    load_delay_ms: AtomicU64,
    write_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message row, excluded ones included, in insertion order.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.lock().messages.clone()
    }

    pub fn bans(&self) -> Vec<BanRecord> {
        self.lock().bans.clone()
    }

    /// How many times `select_messages` has run.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make the next `n` message inserts fail.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Stall every `select_messages` call for `d` before it reads.
    pub fn delay_loads(&self, d: Duration) {
        self.load_delay_ms.store(d.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stall every `insert_message` call for `d` before the row lands.
    pub fn delay_writes(&self, d: Duration) {
        self.write_delay_ms.store(d.as_millis() as u64, Ordering::SeqCst);
    }

    async fn stall(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let injected = self
            .fail_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Task("injected insert failure".into()));
        }
        Self::stall(&self.write_delay_ms).await;
        self.lock().messages.push(record.clone());
        Ok(())
    }

    async fn exclude_message(&self, channel: &str, message_id: &str) -> Result<bool, StoreError> {
        let mut rows = self.lock();
        let mut found = false;
        for m in rows
            .messages
            .iter_mut()
            .filter(|m| m.channel == channel && m.message_id == message_id)
        {
            m.excluded = true;
            found = true;
        }
        Ok(found)
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        self.lock().bans.push(ban.clone());
        Ok(())
    }

    async fn select_bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        Ok(self.lock().bans.clone())
    }

    async fn lift_bans(
        &self,
        channel: &str,
        user_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut rows = self.lock();
        let mut n = 0;
        for b in rows
            .bans
            .iter_mut()
            .filter(|b| b.channel == channel && b.user_hash == user_hash)
        {
            if b.lifted_at.map_or(true, |l| l > at) {
                b.lifted_at = Some(at);
                n += 1;
            }
        }
        Ok(n)
    }

    async fn select_messages(
        &self,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Self::stall(&self.load_delay_ms).await;
        let rows = self.lock();
        Ok(rows
            .messages
            .iter()
            .filter(|m| m.channel == channel && !m.excluded)
            .filter(|m| {
                !rows.bans.iter().any(|b| {
                    b.channel == m.channel
                        && b.user_hash == m.user_hash
                        && b.suppresses(m.sent_at, now)
                })
            })
            .map(|m| m.content.clone())
            .collect())
    }

    async fn select_distinct_channels(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.lock();
        let set: BTreeSet<&str> = rows.messages.iter().map(|m| m.channel.as_str()).collect();
        Ok(set.into_iter().map(str::to_string).collect())
    }
}
