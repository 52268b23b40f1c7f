// tests/pipeline_tests.rs
// End-to-end pipeline behaviour over the in-memory store with a paused clock:
// queue delay, commit grace window, moderation cancellation, unban, shutdown
// and restart.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use turing_core::memory::MemoryStore;
use turing_core::{CoreConfig, Turing};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn start() -> (Arc<MemoryStore>, Turing) {
    start_with(CoreConfig::default())
}

fn start_with(cfg: CoreConfig) -> (Arc<MemoryStore>, Turing) {
    let store = Arc::new(MemoryStore::new());
    let turing = Turing::start(store.clone(), &cfg);
    (store, turing)
}

async fn corpus_lines(turing: &Turing, channel: &str) -> Vec<String> {
    turing
        .cache()
        .with_corpus(channel, |c| c.raw_messages().to_vec())
        .await
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn message_is_learned_after_commit_delay() {
    let (store, turing) = start();
    assert!(turing.on_message("x", "1", "m1", "hello @bob world", at(0)));

    sleep(Duration::from_secs(20)).await;
    assert!(store.messages().is_empty(), "nothing is written inside the grace window");
    assert_eq!(turing.pending(), 1);

    sleep(Duration::from_secs(15)).await;
    let (lines, twos) = turing
        .cache()
        .with_corpus("x", |c| (c.raw_messages().to_vec(), c.lengths().get(&2).copied()))
        .await
        .expect("channel loaded by the commit");
    assert_eq!(lines, vec!["hello world".to_string()]);
    assert_eq!(twos, Some(1));
    assert_eq!(store.messages().len(), 1);
    assert!(!store.messages()[0].excluded);
    assert_eq!(turing.pending(), 0);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ban_inside_queue_delay_cancels_pending_commit() {
    let (store, turing) = start();
    turing.on_message("x", "2", "m2", "bad text", at(0));
    sleep(Duration::from_secs(1)).await;
    turing.on_ban("x", "2", at(1));

    sleep(Duration::from_secs(40)).await;
    turing.ensure_loaded("x").await.unwrap();
    assert!(!corpus_lines(&turing, "x").await.contains(&"bad text".to_string()));
    assert!(store.messages().is_empty());
    assert_eq!(store.bans().len(), 1);
    assert_eq!(turing.pending(), 0);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ban_during_commit_delay_cancels_pending_commit() {
    let (store, turing) = start();
    turing.on_message("x", "2", "m2", "bad text", at(0));
    turing.on_message("x", "3", "m3", "good text", at(0));
    sleep(Duration::from_secs(10)).await;
    assert_eq!(turing.pending(), 2);
    turing.on_ban("x", "2", at(10));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&turing, "x").await, vec!["good text".to_string()]);
    assert_eq!(store.messages().len(), 1);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deletion_cancels_only_that_message() {
    let (store, turing) = start();
    turing.on_message("x", "1", "m1", "keep me", at(0));
    turing.on_message("x", "1", "m2", "delete me", at(0));
    sleep(Duration::from_secs(12)).await;
    turing.on_message_deleted("x", "m2", at(12));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&turing, "x").await, vec!["keep me".to_string()]);
    assert_eq!(store.messages().len(), 1);
    assert!(turing.moderation().is_censored("x", &"m2".into()));

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn simultaneous_ban_is_dispatched_first() {
    let (store, turing) = start();
    turing.on_message("x", "4", "m1", "never seen", at(0));
    turing.on_ban("x", "4", at(0));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(turing.pending(), 0, "message dropped at dispatch");
    sleep(Duration::from_secs(40)).await;
    assert!(store.messages().is_empty());

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timeout_suppresses_history_until_expiry() {
    let (_store, turing) = start();
    turing.on_timeout("x", "6", at(100), 600);
    turing.on_message("x", "6", "old", "long ago", at(10));
    turing.on_message("x", "6", "during", "while timed out", at(300));
    turing.on_message("x", "6", "after", "back again", at(800));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&turing, "x").await, vec!["back again".to_string()]);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timeout_lookback_limits_suppressed_history() {
    let mut cfg = CoreConfig::default();
    cfg.moderation.timeout_lookback_secs = Some(60);
    let (_store, turing) = start_with(cfg);
    turing.on_timeout("x", "6", at(100), 600);
    turing.on_message("x", "6", "old", "long ago", at(10));
    turing.on_message("x", "6", "recent", "just before", at(90));
    turing.on_message("x", "6", "during", "while timed out", at(300));
    turing.on_message("x", "6", "after", "back again", at(800));

    sleep(Duration::from_secs(40)).await;
    let mut lines = corpus_lines(&turing, "x").await;
    lines.sort();
    assert_eq!(lines, vec!["back again".to_string(), "long ago".to_string()]);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unban_readmits_later_messages_only() {
    let (store, turing) = start();
    turing.on_ban("x", "5", at(0));
    sleep(Duration::from_secs(5)).await;

    assert!(turing.on_unban("x", "5", at(10)));
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.bans()[0].lifted_at, Some(at(10)));

    turing.on_message("x", "5", "m1", "from before", at(5));
    turing.on_message("x", "5", "m2", "welcome back", at(20));
    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&turing, "x").await, vec!["welcome back".to_string()]);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unban_right_after_ban_still_lifts_it() {
    let (store, turing) = start();
    turing.on_ban("x", "5", at(0));
    sleep(Duration::from_secs(1)).await;
    turing.on_unban("x", "5", at(1));
    turing.on_message("x", "5", "m1", "welcome back", at(20));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&turing, "x").await, vec!["welcome back".to_string()]);
    assert_eq!(store.bans().len(), 1);
    assert_eq!(store.bans()[0].lifted_at, Some(at(1)));
    assert!(!turing.moderation().is_suppressed("x", &"5".into(), at(20)));

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ignored_accounts_and_duplicates_are_dropped() {
    let (store, turing) = start();
    assert!(!turing.on_message("x", "19264788", "b1", "i am a bot", at(0)));
    assert!(turing.on_message("x", "1", "m1", "once only", at(0)));
    assert!(turing.on_message("x", "1", "m1", "once only", at(0)));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(store.messages().len(), 1);
    assert_eq!(corpus_lines(&turing, "x").await, vec!["once only".to_string()]);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn blocked_words_never_reach_storage() {
    let mut cfg = CoreConfig::default();
    cfg.moderation.blocked_words = vec!["spoiler".to_string()];
    let (store, turing) = start_with(cfg);
    turing.on_message("x", "1", "m1", "huge SPOILER ahead", at(0));
    turing.on_message("x", "1", "m2", "harmless", at(0));

    sleep(Duration::from_secs(40)).await;
    assert_eq!(store.messages().len(), 1);
    assert_eq!(corpus_lines(&turing, "x").await, vec!["harmless".to_string()]);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_queue_and_cancels_pending() {
    let (store, turing) = start();
    turing.on_message("x", "1", "m1", "in flight", at(0));
    sleep(Duration::from_secs(10)).await;
    turing.on_message("x", "1", "m2", "still queued", at(10));
    assert_eq!(turing.pending(), 1);
    assert_eq!(turing.queued(), 1);

    turing.shutdown().await;
    assert_eq!(turing.pending(), 0);
    assert_eq!(turing.queued(), 0);
    assert!(!turing.on_message("x", "1", "m3", "too late", at(20)));

    sleep(Duration::from_secs(60)).await;
    assert!(store.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rebuild_after_restart_counts_each_message_once() {
    let store = Arc::new(MemoryStore::new());
    let first = Turing::start(store.clone(), &CoreConfig::default());
    first.on_message("x", "1", "m1", "alpha beta", at(0));
    first.on_message("y", "1", "m2", "gamma delta", at(0));
    sleep(Duration::from_secs(40)).await;
    first.shutdown().await;

    let second = Turing::start(store.clone(), &CoreConfig::default());
    assert_eq!(second.preload().await.unwrap(), 2);
    assert_eq!(corpus_lines(&second, "x").await, vec!["alpha beta".to_string()]);
    assert_eq!(corpus_lines(&second, "y").await, vec!["gamma delta".to_string()]);
    assert_eq!(second.generate("x").await.unwrap(), "alpha beta");
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ban_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = Turing::start(store.clone(), &CoreConfig::default());
    first.on_ban("x", "7", at(0));
    sleep(Duration::from_secs(5)).await;
    first.shutdown().await;

    let second = Turing::start(store.clone(), &CoreConfig::default());
    second.on_message("x", "7", "m1", "still banned", at(100));
    sleep(Duration::from_secs(40)).await;

    assert!(second.moderation().is_suppressed("x", &"7".into(), at(100)));
    assert!(store.messages().is_empty());
    second.ensure_loaded("x").await.unwrap();
    assert!(corpus_lines(&second, "x").await.is_empty());
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deletion_during_first_load_is_never_stored() {
    let (store, turing) = start();
    store.delay_loads(Duration::from_secs(10));
    turing.on_message("x", "1", "m1", "delete me", at(0));

    // queue 4s + grace 30s, then the load runs until 44s
    sleep(Duration::from_secs(36)).await;
    turing.on_message_deleted("x", "m1", at(36));

    sleep(Duration::from_secs(30)).await;
    assert!(store.messages().is_empty());
    assert!(corpus_lines(&turing, "x").await.is_empty());
    assert_eq!(turing.pending(), 0);

    turing.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deletion_during_write_is_excluded_from_rebuild() {
    let (store, turing) = start();
    store.delay_writes(Duration::from_secs(10));
    turing.on_message("x", "1", "m1", "delete me", at(0));
    turing.on_message("x", "1", "m2", "keep me", at(0));

    // both writes are in flight from 34s to 44s
    sleep(Duration::from_secs(36)).await;
    turing.on_message_deleted("x", "m1", at(36));

    sleep(Duration::from_secs(30)).await;
    let rows = store.messages();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().find(|r| r.message_id == "m1").unwrap().excluded);
    assert_eq!(corpus_lines(&turing, "x").await, vec!["keep me".to_string()]);
    turing.shutdown().await;

    let second = Turing::start(store.clone(), &CoreConfig::default());
    second.ensure_loaded("x").await.unwrap();
    assert_eq!(corpus_lines(&second, "x").await, vec!["keep me".to_string()]);
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deletion_after_commit_is_excluded_from_rebuild() {
    let (store, turing) = start();
    turing.on_message("x", "1", "m1", "too late", at(0));
    turing.on_message("x", "1", "m2", "keep me", at(0));
    sleep(Duration::from_secs(40)).await;
    assert_eq!(store.messages().len(), 2);

    turing.on_message_deleted("x", "m1", at(40));
    sleep(Duration::from_secs(5)).await;
    assert!(store.messages().iter().find(|r| r.message_id == "m1").unwrap().excluded);
    turing.shutdown().await;

    let second = Turing::start(store.clone(), &CoreConfig::default());
    second.ensure_loaded("x").await.unwrap();
    assert_eq!(corpus_lines(&second, "x").await, vec!["keep me".to_string()]);
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn newly_blocked_word_applies_to_history_on_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = Turing::start(store.clone(), &CoreConfig::default());
    first.on_message("x", "1", "m1", "huge spoiler ahead", at(0));
    first.on_message("x", "1", "m2", "harmless", at(0));
    sleep(Duration::from_secs(40)).await;
    assert_eq!(corpus_lines(&first, "x").await.len(), 2);
    first.shutdown().await;

    let mut cfg = CoreConfig::default();
    cfg.moderation.blocked_words = vec!["Spoiler".to_string()];
    let second = Turing::start(store.clone(), &cfg);
    second.ensure_loaded("x").await.unwrap();
    assert_eq!(corpus_lines(&second, "x").await, vec!["harmless".to_string()]);
    second.shutdown().await;
}
