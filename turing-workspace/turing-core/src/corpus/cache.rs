// turing-core/src/corpus/cache.rs
//! Channel → [`Corpus`] map behind one async reader/writer lock.
//!
//! - A channel is loaded lazily, at most once, from the durable store.
//!   Stored rows containing a blocked word are skipped on load, so a word
//!   added to the blocklist applies to history at the next rebuild.
//! - Writers (`ensure_loaded`, `add`) take the write lock; `generate` takes
//!   the read lock and samples synchronously, so no guard is held across an
//!   await other than the store read during a load.

use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::channel_corpus::Corpus;
use crate::error::{CacheError, StoreError};
use crate::memory::MessageStore;
use crate::services::moderation::BlockedWords;

pub struct CorpusCache {
    store: Arc<dyn MessageStore>,
    order: usize,
    attempts: usize,
    blocked_words: BlockedWords,
    corpora: RwLock<HashMap<String, Corpus>>,
}

impl CorpusCache {
    pub fn new(store: Arc<dyn MessageStore>, order: usize, attempts: usize) -> Self {
        Self {
            store,
            order: order.max(1),
            attempts,
            blocked_words: BlockedWords::default(),
            corpora: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_blocked_words(mut self, blocked_words: BlockedWords) -> Self {
        self.blocked_words = blocked_words;
        self
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub async fn is_loaded(&self, channel: &str) -> bool {
        self.corpora.read().await.contains_key(channel)
    }

    /// Load `channel` from the store unless already present. Concurrent
    /// callers for the same channel trigger a single rebuild.
    pub async fn ensure_loaded(&self, channel: &str) -> Result<(), StoreError> {
        if self.corpora.read().await.contains_key(channel) {
            return Ok(());
        }
        let mut corpora = self.corpora.write().await;
        if corpora.contains_key(channel) {
            return Ok(());
        }
        let mut rows = self.store.select_messages(channel, Utc::now()).await?;
        let stored = rows.len();
        rows.retain(|r| !self.blocked_words.matches(r));
        let corpus = Corpus::from_messages(self.order, &rows);
        info!(
            channel = %channel,
            stored,
            blocked = stored - rows.len(),
            learned = corpus.len(),
            "corpus loaded"
        );
        corpora.insert(channel.to_string(), corpus);
        Ok(())
    }

    /// Learn one committed message. The channel must already be loaded.
    pub(crate) async fn add(&self, channel: &str, text: &str) -> Result<bool, CacheError> {
        let mut corpora = self.corpora.write().await;
        let corpus = corpora
            .get_mut(channel)
            .ok_or_else(|| CacheError::NotLoaded(channel.to_string()))?;
        let learned = corpus.add(text);
        debug!(channel = %channel, learned, size = corpus.len(), "corpus add");
        Ok(learned)
    }

    /// Sample from one loaded channel. `None` if unloaded, empty, or out of
    /// attempts.
    pub async fn generate_with<R: Rng + ?Sized>(&self, channel: &str, rng: &mut R) -> Option<String> {
        let corpora = self.corpora.read().await;
        corpora.get(channel)?.generate(rng, self.attempts)
    }

    pub async fn generate(&self, channel: &str) -> Option<String> {
        let corpora = self.corpora.read().await;
        let corpus = corpora.get(channel)?;
        corpus.generate(&mut rand::thread_rng(), self.attempts)
    }

    /// Run `f` against the loaded corpus for `channel` under the read lock.
    pub async fn with_corpus<T>(&self, channel: &str, f: impl FnOnce(&Corpus) -> T) -> Option<T> {
        let corpora = self.corpora.read().await;
        corpora.get(channel).map(f)
    }

    /// Run `f` against every loaded corpus named in `channels` under a single
    /// read lock. Missing channels are left out.
    pub async fn with_corpora<T>(
        &self,
        channels: &[&str],
        f: impl FnOnce(Vec<(&str, &Corpus)>) -> T,
    ) -> T {
        let corpora = self.corpora.read().await;
        let found: Vec<(&str, &Corpus)> = channels
            .iter()
            .filter_map(|c| corpora.get(*c).map(|corpus| (*c, corpus)))
            .collect();
        f(found)
    }

    pub async fn loaded_channels(&self) -> Vec<String> {
        let mut v: Vec<String> = self.corpora.read().await.keys().cloned().collect();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn add_requires_loaded_channel() {
        let store = Arc::new(MemoryStore::new());
        let cache = CorpusCache::new(store, 2, 100);
        assert!(matches!(
            cache.add("x", "hello world").await,
            Err(CacheError::NotLoaded(c)) if c == "x"
        ));
        cache.ensure_loaded("x").await.unwrap();
        assert!(cache.add("x", "hello world").await.unwrap());
        assert!(!cache.add("x", "@nobody").await.unwrap());
        assert_eq!(cache.with_corpus("x", |c| c.len()).await, Some(1));
    }

    #[tokio::test]
    async fn generate_on_unknown_channel_is_none() {
        let cache = CorpusCache::new(Arc::new(MemoryStore::new()), 2, 100);
        assert!(cache.generate("nope").await.is_none());
        assert!(cache.loaded_channels().await.is_empty());
    }

    #[tokio::test]
    async fn blocked_words_apply_to_stored_history() {
        use crate::memory::MessageRecord;
        use chrono::DateTime;

        let store = Arc::new(MemoryStore::new());
        for (i, text) in ["a fine line", "this one has a Slur in it", "another fine line"]
            .into_iter()
            .enumerate()
        {
            store
                .insert_message(&MessageRecord {
                    channel: "x".into(),
                    user_hash: "h".into(),
                    message_id: format!("m{i}"),
                    content: text.into(),
                    sent_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + i as i64, 0).unwrap(),
                    excluded: false,
                })
                .await
                .unwrap();
        }

        let cache = CorpusCache::new(store, 2, 100)
            .with_blocked_words(BlockedWords::new(vec!["slur".to_string()]));
        cache.ensure_loaded("x").await.unwrap();
        assert_eq!(
            cache.with_corpus("x", |c| c.raw_messages().to_vec()).await,
            Some(vec!["a fine line".to_string(), "another fine line".to_string()])
        );
    }
}
