// turing-core/src/memory/sqlite.rs
//! Single-writer SQLite message store.
//!
//! - Owns one SQLite connection (WAL) behind a mutex; every call runs on the
//!   blocking pool so the async side never stalls on disk.
//! - Persists messages with a hashed author and an `excluded` flag, plus
//!   ban/timeout ranges used to filter history on corpus rebuild.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;
use crate::memory::store::{parse_ts, ts, BanRecord, MessageRecord, MessageStore};

const SCHEMA: &str = r#"
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS messages (
      id          INTEGER PRIMARY KEY AUTOINCREMENT,
      channel     TEXT NOT NULL,
      user_hash   TEXT NOT NULL,     -- blake3 of the platform user id
      message_id  TEXT NOT NULL,     -- platform message id (audit only)
      content     TEXT NOT NULL,     -- raw text as received
      sent_at     TEXT NOT NULL,     -- RFC3339 UTC, fixed precision
      excluded    INTEGER NOT NULL DEFAULT 0  -- 1 = moderated, never loaded
    );

    CREATE TABLE IF NOT EXISTS bans (
      id          INTEGER PRIMARY KEY AUTOINCREMENT,
      channel     TEXT NOT NULL,
      user_hash   TEXT NOT NULL,
      banned_at   TEXT NOT NULL,
      covers_from TEXT,              -- NULL = whole history
      lifted_at   TEXT               -- timeout expiry or unban time
    );

    CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages(channel, id);
    CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(channel, message_id);
    CREATE INDEX IF NOT EXISTS idx_bans_channel_user ON bans(channel, user_hash);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open/create the database file and ensure schema.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(db_path)?;
        Self::from_connection(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Message rows per channel, `(total, excluded)`. Synchronous; meant for
    /// the admin tool.
    pub fn message_counts(&self) -> Result<Vec<(String, i64, i64)>, StoreError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = db.prepare(
            "SELECT channel, COUNT(*), SUM(excluded) FROM messages GROUP BY channel ORDER BY channel",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            ))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Look up whether `message_id` was recorded in `channel` and if so
    /// whether it was excluded.
    pub fn message_excluded(&self, channel: &str, message_id: &str) -> Result<Option<bool>, StoreError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let v = db
            .query_row(
                "SELECT excluded FROM messages WHERE channel=?1 AND message_id=?2",
                (channel, message_id),
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(v.map(|e| e != 0))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let r = record.clone();
        self.with_conn(move |db| {
            db.execute(
                r#"
                INSERT INTO messages(channel, user_hash, message_id, content, sent_at, excluded)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                (
                    &r.channel,
                    &r.user_hash,
                    &r.message_id,
                    &r.content,
                    ts(r.sent_at),
                    r.excluded as i64,
                ),
            )?;
            Ok(())
        })
        .await
    }

    async fn exclude_message(&self, channel: &str, message_id: &str) -> Result<bool, StoreError> {
        let (channel, message_id) = (channel.to_string(), message_id.to_string());
        self.with_conn(move |db| {
            let n = db.execute(
                "UPDATE messages SET excluded = 1 WHERE channel = ?1 AND message_id = ?2",
                (&channel, &message_id),
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        let b = ban.clone();
        self.with_conn(move |db| {
            db.execute(
                r#"
                INSERT INTO bans(channel, user_hash, banned_at, covers_from, lifted_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                (
                    &b.channel,
                    &b.user_hash,
                    ts(b.banned_at),
                    b.covers_from.map(ts),
                    b.lifted_at.map(ts),
                ),
            )?;
            Ok(())
        })
        .await
    }

    async fn select_bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(
                "SELECT channel, user_hash, banned_at, covers_from, lifted_at FROM bans ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (channel, user_hash, banned_at, covers_from, lifted_at) = row?;
                out.push(BanRecord {
                    channel,
                    user_hash,
                    banned_at: parse_ts(&banned_at)?,
                    covers_from: covers_from.as_deref().map(parse_ts).transpose()?,
                    lifted_at: lifted_at.as_deref().map(parse_ts).transpose()?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn lift_bans(
        &self,
        channel: &str,
        user_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let (channel, user_hash, at) = (channel.to_string(), user_hash.to_string(), ts(at));
        self.with_conn(move |db| {
            let n = db.execute(
                r#"
                UPDATE bans SET lifted_at = ?3
                WHERE channel = ?1 AND user_hash = ?2
                  AND (lifted_at IS NULL OR lifted_at > ?3)
                "#,
                (&channel, &user_hash, &at),
            )?;
            Ok(n)
        })
        .await
    }

    async fn select_messages(
        &self,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let (channel, now) = (channel.to_string(), ts(now));
        self.with_conn(move |db| {
            let mut stmt = db.prepare(
                r#"
                SELECT m.content FROM messages m
                WHERE m.channel = ?1 AND m.excluded = 0
                  AND NOT EXISTS (
                    SELECT 1 FROM bans b
                    WHERE b.channel = m.channel
                      AND b.user_hash = m.user_hash
                      AND b.banned_at <= ?2
                      AND (b.covers_from IS NULL OR m.sent_at >= b.covers_from)
                      AND (b.lifted_at IS NULL OR m.sent_at < b.lifted_at)
                  )
                ORDER BY m.id
                "#,
            )?;
            let rows = stmt.query_map((&channel, &now), |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn select_distinct_channels(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|db| {
            let mut stmt = db.prepare("SELECT DISTINCT channel FROM messages ORDER BY channel")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UserId;
    use crate::memory::store::hash_user;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(channel: &str, user: &str, id: &str, content: &str, secs: i64, excluded: bool) -> MessageRecord {
        MessageRecord {
            channel: channel.to_string(),
            user_hash: hash_user(&UserId::from(user)),
            message_id: id.to_string(),
            content: content.to_string(),
            sent_at: at(secs),
            excluded,
        }
    }

    #[tokio::test]
    async fn select_skips_excluded_and_banned() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("cache").join("turing.db")).unwrap();

        store.insert_message(&record("x", "1", "m1", "hello world", 0, false)).await.unwrap();
        store.insert_message(&record("x", "1", "m2", "moderated", 1, true)).await.unwrap();
        store.insert_message(&record("x", "2", "m3", "from a banned user", 2, false)).await.unwrap();
        store.insert_message(&record("y", "1", "m4", "other channel", 3, false)).await.unwrap();
        store
            .insert_ban(&BanRecord {
                channel: "x".into(),
                user_hash: hash_user(&UserId::from("2")),
                banned_at: at(5),
                covers_from: None,
                lifted_at: None,
            })
            .await
            .unwrap();

        let got = store.select_messages("x", at(10)).await.unwrap();
        assert_eq!(got, vec!["hello world".to_string()]);
        assert_eq!(store.message_excluded("x", "m2").unwrap(), Some(true));
        assert_eq!(store.message_excluded("x", "nope").unwrap(), None);

        let channels = store.select_distinct_channels().await.unwrap();
        assert_eq!(channels, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn lifted_ban_readmits_later_messages_only() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = hash_user(&UserId::from("3"));
        store.insert_message(&record("x", "3", "m1", "before", 0, false)).await.unwrap();
        store
            .insert_ban(&BanRecord {
                channel: "x".into(),
                user_hash: user.clone(),
                banned_at: at(10),
                covers_from: None,
                lifted_at: None,
            })
            .await
            .unwrap();
        store.insert_message(&record("x", "3", "m2", "after", 100, false)).await.unwrap();

        assert!(store.select_messages("x", at(200)).await.unwrap().is_empty());

        assert_eq!(store.lift_bans("x", &user, at(50)).await.unwrap(), 1);
        assert_eq!(
            store.select_messages("x", at(200)).await.unwrap(),
            vec!["after".to_string()]
        );

        let counts = store.message_counts().unwrap();
        assert_eq!(counts, vec![("x".to_string(), 2, 0)]);
    }

    #[tokio::test]
    async fn bans_read_back_as_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turing.db");
        let user = hash_user(&UserId::from("4"));
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_ban(&BanRecord {
                    channel: "x".into(),
                    user_hash: user.clone(),
                    banned_at: at(10),
                    covers_from: Some(at(4)),
                    lifted_at: Some(at(610)),
                })
                .await
                .unwrap();
            store
                .insert_ban(&BanRecord {
                    channel: "y".into(),
                    user_hash: user.clone(),
                    banned_at: at(20),
                    covers_from: None,
                    lifted_at: None,
                })
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let bans = reopened.select_bans().await.unwrap();
        assert_eq!(bans.len(), 2);
        assert_eq!(bans[0].channel, "x");
        assert_eq!(bans[0].covers_from, Some(at(4)));
        assert_eq!(bans[0].lifted_at, Some(at(610)));
        assert_eq!(bans[1].user_hash, user);
        assert_eq!(bans[1].lifted_at, None);
    }

    #[tokio::test]
    async fn excluding_a_stored_message_hides_it_from_rebuild() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(&record("x", "1", "m1", "keep me", 0, false)).await.unwrap();
        store.insert_message(&record("x", "1", "m2", "delete me", 1, false)).await.unwrap();

        assert!(store.exclude_message("x", "m2").await.unwrap());
        assert!(!store.exclude_message("x", "missing").await.unwrap());
        assert!(!store.exclude_message("y", "m1").await.unwrap(), "scoped to the channel");

        assert_eq!(store.select_messages("x", at(10)).await.unwrap(), vec!["keep me".to_string()]);
        assert_eq!(store.message_excluded("x", "m2").unwrap(), Some(true));
    }
}
