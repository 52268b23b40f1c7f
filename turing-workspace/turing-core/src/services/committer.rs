// turing-core/src/services/committer.rs
//! Delayed-commit unit: one per admitted message.
//!
//! The unit sleeps for the grace window, then re-checks moderation and either
//! records the message as excluded (audit only) or persists it and folds it
//! into the channel corpus. A ban or deletion that lands before the write
//! cancels the unit with no effect; one that lands while the write is in
//! flight flips the stored row to excluded. The registry entry is released
//! when the [`PendingGuard`] drops.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::corpus::CorpusCache;
use crate::events::{MessageId, UserId};
use crate::memory::{hash_user, MessageRecord, MessageStore};
use crate::services::moderation::{ModerationIndex, Verdict};
use crate::services::pending::PendingGuard;

pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommitSettings {
    pub commit_delay: Duration,
    /// Extra attempts after a failed insert.
    pub write_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            commit_delay: DEFAULT_COMMIT_DELAY,
            write_retries: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// How a unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Cancelled by moderation or shutdown before anything was written.
    Cancelled,
    /// Written with `excluded = 1`, or flagged so right after the write;
    /// corpus untouched.
    Excluded(Verdict),
    /// Written and learned by the corpus.
    Committed,
    /// Written but not learned: the corpus could not be loaded, shutdown
    /// landed during the write, or the exclusion flag could not be set.
    CommittedUnlearned,
    /// Gave up after repeated write failures.
    Dropped,
}

pub struct Committer {
    store: Arc<dyn MessageStore>,
    moderation: Arc<ModerationIndex>,
    cache: Arc<CorpusCache>,
    settings: CommitSettings,
}

impl Committer {
    pub fn new(
        store: Arc<dyn MessageStore>,
        moderation: Arc<ModerationIndex>,
        cache: Arc<CorpusCache>,
        settings: CommitSettings,
    ) -> Self {
        Self {
            store,
            moderation,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &CommitSettings {
        &self.settings
    }

    pub async fn run(&self, guard: PendingGuard, sent_at: DateTime<Utc>, content: String) -> CommitOutcome {
        let key = guard.key().clone();
        tokio::select! {
            biased;
            _ = guard.token().cancelled() => {
                debug!(channel = %key.channel, message = %key.message, "commit cancelled");
                return CommitOutcome::Cancelled;
            }
            _ = tokio::time::sleep(self.settings.commit_delay) => {}
        }
        if guard.is_cancelled() {
            return CommitOutcome::Cancelled;
        }

        let verdict = self
            .moderation
            .verdict(&key.channel, &key.user, &key.message, &content, sent_at);
        let mut record = MessageRecord {
            channel: key.channel.clone(),
            user_hash: hash_user(&key.user),
            message_id: key.message.as_str().to_string(),
            content,
            sent_at,
            excluded: !verdict.is_admitted(),
        };

        if !verdict.is_admitted() {
            debug!(
                channel = %key.channel,
                message = %key.message,
                verdict = verdict.as_str(),
                "message suppressed at commit"
            );
            return if self.persist(&record, &guard).await {
                CommitOutcome::Excluded(verdict)
            } else {
                CommitOutcome::Dropped
            };
        }

        // Load before the write so a first-time load cannot pick this row up
        // and count it a second time below.
        let loaded = match self.cache.ensure_loaded(&key.channel).await {
            Ok(()) => true,
            Err(e) => {
                warn!(channel = %key.channel, error = %e, "corpus load failed; persisting only");
                false
            }
        };

        if guard.is_cancelled() {
            debug!(channel = %key.channel, message = %key.message, "commit cancelled before write");
            return CommitOutcome::Cancelled;
        }
        if !self.persist(&record, &guard).await {
            return CommitOutcome::Dropped;
        }
        if guard.is_cancelled() {
            return self.retract(&record, &key.user).await;
        }
        if !loaded {
            return CommitOutcome::CommittedUnlearned;
        }

        let text = std::mem::take(&mut record.content);
        match self.cache.add(&key.channel, &text).await {
            Ok(_) => CommitOutcome::Committed,
            Err(e) => {
                warn!(channel = %key.channel, error = %e, "corpus update skipped");
                CommitOutcome::CommittedUnlearned
            }
        }
    }

    /// Cancelled while the row was being written. If moderation now rejects
    /// it, flag the stored row; a shutdown cancel leaves it admissible.
    async fn retract(&self, record: &MessageRecord, user: &UserId) -> CommitOutcome {
        let message = MessageId::from(record.message_id.as_str());
        let verdict = self
            .moderation
            .verdict(&record.channel, user, &message, &record.content, record.sent_at);
        if verdict.is_admitted() {
            debug!(channel = %record.channel, message = %message, "cancelled during write; not learned");
            return CommitOutcome::CommittedUnlearned;
        }
        match self.store.exclude_message(&record.channel, &record.message_id).await {
            Ok(_) => {
                debug!(
                    channel = %record.channel,
                    message = %message,
                    verdict = verdict.as_str(),
                    "row excluded after write"
                );
                CommitOutcome::Excluded(verdict)
            }
            Err(e) => {
                warn!(channel = %record.channel, message = %message, error = %e, "row left admissible");
                CommitOutcome::CommittedUnlearned
            }
        }
    }

    /// Insert with bounded retries. Returns whether the row was written.
    async fn persist(&self, record: &MessageRecord, guard: &PendingGuard) -> bool {
        let mut attempt: u32 = 0;
        loop {
            match self.store.insert_message(record).await {
                Ok(()) => return true,
                Err(e) if attempt < self.settings.write_retries => {
                    attempt += 1;
                    warn!(
                        channel = %record.channel,
                        message = %record.message_id,
                        attempt,
                        error = %e,
                        "message write failed; retrying"
                    );
                    let backoff = self.settings.retry_backoff * attempt;
                    tokio::select! {
                        biased;
                        _ = guard.token().cancelled() => {
                            warn!(channel = %record.channel, message = %record.message_id, "write retries abandoned");
                            return false;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        channel = %record.channel,
                        message = %record.message_id,
                        error = %e,
                        "message dropped after repeated write failures"
                    );
                    return false;
                }
            }
        }
    }
}
