// turing-core/src/memory/store.rs
//! Durable-storage seam used by the commit path and by corpus rebuilds.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;
use crate::events::UserId;

/// Context string for user-id hashing. Changing it orphans every stored row.
const USER_HASH_CONTEXT: &str = "turing-core 2024-06 chat user id";

/// One-way, deterministic hash of a platform user id. Raw ids never reach
/// storage.
pub fn hash_user(user: &UserId) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(USER_HASH_CONTEXT);
    hasher.update(user.as_str().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Fixed-precision RFC 3339 so stored timestamps compare lexicographically.
pub fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Inverse of [`ts`].
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp `{s}`: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub channel: String,
    pub user_hash: String,
    pub message_id: String,
    /// Raw content as received; normalization happens on the corpus side.
    pub content: String,
    pub sent_at: DateTime<Utc>,
    /// Kept for audit only; never loaded into a corpus.
    pub excluded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub channel: String,
    pub user_hash: String,
    pub banned_at: DateTime<Utc>,
    /// Earliest message time the ban reaches back to; `None` = all history.
    pub covers_from: Option<DateTime<Utc>>,
    /// Expiry for timeouts, unban time for lifted bans.
    pub lifted_at: Option<DateTime<Utc>>,
}

impl BanRecord {
    /// Whether this ban, recorded no later than `now`, suppresses a message
    /// sent at `sent_at`.
    pub fn suppresses(&self, sent_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.banned_at <= now
            && self.covers_from.map_or(true, |f| sent_at >= f)
            && self.lifted_at.map_or(true, |l| sent_at < l)
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Mark an already-stored message as excluded. Returns whether a row
    /// was found.
    async fn exclude_message(&self, channel: &str, message_id: &str) -> Result<bool, StoreError>;

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError>;

    /// Every recorded ban across channels, lifted ones included.
    async fn select_bans(&self) -> Result<Vec<BanRecord>, StoreError>;

    /// Close open bans for a user at `at`. Returns the number of rows touched.
    async fn lift_bans(
        &self,
        channel: &str,
        user_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Admissible message contents for `channel`, oldest first: not excluded
    /// at commit time and not covered by any ban recorded up to `now`.
    async fn select_messages(
        &self,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    async fn select_distinct_channels(&self) -> Result<Vec<String>, StoreError>;
}
