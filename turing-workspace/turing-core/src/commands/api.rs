// turing-core/src/commands/api.rs
//! `Turing`: the one object a chat-bot layer holds.
//!
//! It owns the delay queue and its dispatcher task, the moderation index, the
//! pending-write registry and the corpus cache. Chat ingress only enqueues;
//! everything else happens on the dispatcher and the commit units it spawns.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::commands::init::ensure_initialized_once;
use crate::config::CoreConfig;
use crate::corpus::{CorpusCache, WeightedGenerator};
use crate::error::{GenerateError, StoreError};
use crate::events::{EventEnvelope, UserId};
use crate::memory::{MessageStore, SqliteStore};
use crate::services::{Committer, DelayQueue, Dispatcher, ModerationIndex, PendingWrites};

/// Longest timeout honoured as a timeout; anything longer is a ban.
const MAX_TIMEOUT_SECS: i64 = 10 * 365 * 24 * 60 * 60;

pub struct Turing {
    queue: Arc<DelayQueue>,
    moderation: Arc<ModerationIndex>,
    pending: Arc<PendingWrites>,
    store: Arc<dyn MessageStore>,
    cache: Arc<CorpusCache>,
    generator: WeightedGenerator,
    chain_order: usize,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Turing {
    /// Initialize the data root (`TURING_ROOT`), load its config and open
    /// the SQLite store it names.
    pub fn open_default() -> Result<Self> {
        let report = ensure_initialized_once()?;
        let cfg = CoreConfig::load(&report.root)?;
        Self::open(&cfg)
    }

    pub fn open(cfg: &CoreConfig) -> Result<Self> {
        let store = SqliteStore::open(&cfg.storage.db_path)
            .with_context(|| format!("opening store {}", cfg.storage.db_path.display()))?;
        Ok(Self::start(Arc::new(store), cfg))
    }

    /// Wire the pipeline over `store` and spawn the dispatcher. Must be
    /// called inside a Tokio runtime.
    pub fn start(store: Arc<dyn MessageStore>, cfg: &CoreConfig) -> Self {
        let queue = Arc::new(DelayQueue::new(cfg.pipeline.queue_delay()));
        let moderation = Arc::new(ModerationIndex::new(
            cfg.moderation.always_ignored_ids(),
            cfg.moderation.blocked_words.iter().cloned(),
            cfg.moderation.timeout_lookback(),
        ));
        let pending = PendingWrites::new();
        let cache = Arc::new(
            CorpusCache::new(
                Arc::clone(&store),
                cfg.generation.chain_order,
                cfg.generation.max_attempts,
            )
            .with_blocked_words(moderation.blocked_words().clone()),
        );
        let committer = Arc::new(Committer::new(
            Arc::clone(&store),
            Arc::clone(&moderation),
            Arc::clone(&cache),
            cfg.commit_settings(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&moderation),
            Arc::clone(&pending),
            Arc::clone(&store),
            committer,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(shutdown.clone()));
        info!(
            name = %cfg.system.name,
            commit_delay_secs = cfg.pipeline.commit_delay_secs,
            chain_order = cfg.generation.chain_order,
            "turing started"
        );

        Self {
            queue,
            moderation,
            pending,
            store,
            generator: WeightedGenerator::new(Arc::clone(&cache)),
            cache,
            chain_order: cfg.generation.chain_order,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    // ---------- chat ingress ----------

    /// Returns whether the event was queued.
    pub fn on_message(
        &self,
        channel: &str,
        user: &str,
        message_id: &str,
        content: &str,
        ts: DateTime<Utc>,
    ) -> bool {
        let user = UserId::from(user);
        if self.moderation.is_always_ignored(&user) {
            trace!(channel, "message from ignored account dropped at ingress");
            return false;
        }
        self.enqueue(EventEnvelope::message(channel, user, message_id, content, ts))
    }

    pub fn on_ban(&self, channel: &str, user: &str, ts: DateTime<Utc>) -> bool {
        self.enqueue(EventEnvelope::ban(channel, user, None, ts))
    }

    pub fn on_timeout(&self, channel: &str, user: &str, ts: DateTime<Utc>, duration_secs: u64) -> bool {
        let secs = i64::try_from(duration_secs)
            .unwrap_or(i64::MAX)
            .min(MAX_TIMEOUT_SECS);
        let expires = ts.checked_add_signed(ChronoDuration::seconds(secs));
        self.enqueue(EventEnvelope::ban(channel, user, expires, ts))
    }

    /// Lift a user's ban or timeout at `ts`. Messages sent before `ts` stay
    /// suppressed. Queued like a ban, so it lands after any ban it follows.
    pub fn on_unban(&self, channel: &str, user: &str, ts: DateTime<Utc>) -> bool {
        self.enqueue(EventEnvelope::unban(channel, user, ts))
    }

    pub fn on_message_deleted(&self, channel: &str, message_id: &str, ts: DateTime<Utc>) -> bool {
        self.enqueue(EventEnvelope::censor(channel, message_id, ts))
    }

    fn enqueue(&self, event: EventEnvelope) -> bool {
        if self.shutdown.is_cancelled() {
            debug!(kind = event.kind().as_str(), "event after shutdown dropped");
            return false;
        }
        self.queue.put(event);
        true
    }

    // ---------- read side ----------

    pub async fn ensure_loaded(&self, channel: &str) -> Result<(), StoreError> {
        self.cache.ensure_loaded(channel).await
    }

    /// Load every channel the store knows about. Returns how many.
    pub async fn preload(&self) -> Result<usize, StoreError> {
        let channels = self.store.select_distinct_channels().await?;
        for channel in &channels {
            self.cache.ensure_loaded(channel).await?;
        }
        info!(channels = channels.len(), "corpora preloaded");
        Ok(channels.len())
    }

    /// One sentence from a single channel's corpus.
    pub async fn generate(&self, channel: &str) -> Result<String, GenerateError> {
        self.cache.ensure_loaded(channel).await?;
        let has_data = self
            .cache
            .with_corpus(channel, |c| !c.is_empty())
            .await
            .unwrap_or(false);
        if !has_data {
            return Err(GenerateError::EmptyCorpus);
        }
        self.cache
            .generate(channel)
            .await
            .ok_or(GenerateError::Exhausted {
                attempts: self.cache.attempts(),
            })
    }

    /// One sentence blended from several channels. `chain_order` defaults
    /// to the configured order.
    pub async fn generate_weighted(
        &self,
        weights: &HashMap<String, f64>,
        chain_order: Option<usize>,
    ) -> Result<String, GenerateError> {
        self.generator
            .generate(weights, chain_order.unwrap_or(self.chain_order))
            .await
    }

    // ---------- lifecycle ----------

    /// Stop the dispatcher, discard queued events, cancel every pending
    /// commit and wait for them to unwind.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = {
            let mut slot = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher task ended abnormally");
            }
        }
        let discarded = self.queue.drain().len();
        let cancelled = self.pending.cancel_all();
        info!(discarded, cancelled, "shutting down");
        self.pending.wait_drained().await;
        info!("shutdown complete");
    }

    // ---------- inspection ----------

    pub fn cache(&self) -> &Arc<CorpusCache> {
        &self.cache
    }

    pub fn moderation(&self) -> &ModerationIndex {
        &self.moderation
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Turing {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
