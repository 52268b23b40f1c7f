// turing-core/src/services/moderation.rs
//! Per-channel suppression state: banned/timed-out users and deleted messages.
//!
//! - Windows are keyed by the stored user hash, so bans read back from the
//!   store on startup land in the same slots as live ones.
//! - Entries are never removed. An unban closes a window, it does not erase it.
//! - Users in the always-ignored set (well-known bots) are suppressed in
//!   every channel.
//! - A ban suppresses the user's whole history. A timeout does too, up to
//!   its expiry, unless a lookback is set; then it reaches back only that far.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::events::{MessageId, UserId};
use crate::memory::{hash_user, BanRecord};

/// Time range during which a user's messages are inadmissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionWindow {
    /// `None` = from the beginning of time.
    pub since: Option<DateTime<Utc>>,
    /// `None` = until further notice.
    pub until: Option<DateTime<Utc>>,
}

impl SuppressionWindow {
    pub fn covers(&self, sent_at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| sent_at >= s) && self.until.map_or(true, |u| sent_at < u)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    IgnoredUser,
    Banned,
    Censored,
    BlockedWord,
}

impl Verdict {
    pub fn is_admitted(self) -> bool {
        matches!(self, Verdict::Admit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Admit => "admit",
            Verdict::IgnoredUser => "ignored_user",
            Verdict::Banned => "banned",
            Verdict::Censored => "censored",
            Verdict::BlockedWord => "blocked_word",
        }
    }
}

/// Case-insensitive whole-word blocklist. Cheap to clone; shared between
/// the moderation index and corpus rebuilds.
#[derive(Debug, Clone)]
pub struct BlockedWords {
    words: Arc<[String]>,
}

impl Default for BlockedWords {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl BlockedWords {
    pub fn new(words: impl IntoIterator<Item = String>) -> Self {
        let words: Vec<String> = words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words: words.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn matches(&self, content: &str) -> bool {
        if self.words.is_empty() {
            return false;
        }
        content
            .split_whitespace()
            .map(str::to_lowercase)
            .any(|w| self.words.iter().any(|b| *b == w))
    }
}

#[derive(Debug, Default)]
struct ChannelModeration {
    /// user hash → windows
    ignored: HashMap<String, Vec<SuppressionWindow>>,
    censored: HashSet<MessageId>,
}

#[derive(Debug)]
pub struct ModerationIndex {
    always_ignored: HashSet<UserId>,
    blocked_words: BlockedWords,
    lookback: Option<ChronoDuration>,
    channels: RwLock<HashMap<String, ChannelModeration>>,
}

impl Default for ModerationIndex {
    fn default() -> Self {
        Self::new(Vec::<UserId>::new(), Vec::<String>::new(), None)
    }
}

impl ModerationIndex {
    pub fn new(
        always_ignored: impl IntoIterator<Item = UserId>,
        blocked_words: impl IntoIterator<Item = String>,
        timeout_lookback: Option<Duration>,
    ) -> Self {
        Self {
            always_ignored: always_ignored.into_iter().collect(),
            blocked_words: BlockedWords::new(blocked_words),
            lookback: timeout_lookback.and_then(|d| ChronoDuration::from_std(d).ok()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_always_ignored(&self, user: &UserId) -> bool {
        self.always_ignored.contains(user)
    }

    pub fn blocked_words(&self) -> &BlockedWords {
        &self.blocked_words
    }

    /// Record a ban (`expires == None`) or timeout. Returns the window that
    /// was opened so the caller can persist the same range.
    pub fn ban(
        &self,
        channel: &str,
        user: &UserId,
        at: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> SuppressionWindow {
        let window = SuppressionWindow {
            since: expires.and(self.lookback).map(|lb| at - lb),
            until: expires,
        };
        self.push_window(channel, hash_user(user), window);
        window
    }

    /// Re-open a window persisted by an earlier run.
    pub fn restore(&self, ban: &BanRecord) {
        let window = SuppressionWindow {
            since: ban.covers_from,
            until: ban.lifted_at,
        };
        self.push_window(&ban.channel, ban.user_hash.clone(), window);
    }

    fn push_window(&self, channel: &str, user_hash: String, window: SuppressionWindow) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_default()
            .ignored
            .entry(user_hash)
            .or_default()
            .push(window);
    }

    /// Close every open window for `user` at `at`. Returns whether any was open.
    pub fn unban(&self, channel: &str, user: &UserId, at: DateTime<Utc>) -> bool {
        let user_hash = hash_user(user);
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let Some(windows) = channels
            .get_mut(channel)
            .and_then(|c| c.ignored.get_mut(&user_hash))
        else {
            return false;
        };
        let mut closed = false;
        for w in windows.iter_mut() {
            if w.until.map_or(true, |u| u > at) {
                w.until = Some(at);
                closed = true;
            }
        }
        closed
    }

    pub fn censor(&self, channel: &str, message: &MessageId) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_default()
            .censored
            .insert(message.clone());
    }

    pub fn is_censored(&self, channel: &str, message: &MessageId) -> bool {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(channel)
            .is_some_and(|c| c.censored.contains(message))
    }

    pub fn is_suppressed(&self, channel: &str, user: &UserId, sent_at: DateTime<Utc>) -> bool {
        if self.is_always_ignored(user) {
            return true;
        }
        let user_hash = hash_user(user);
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(channel)
            .and_then(|c| c.ignored.get(&user_hash))
            .is_some_and(|ws| ws.iter().any(|w| w.covers(sent_at)))
    }

    pub fn contains_blocked_word(&self, content: &str) -> bool {
        self.blocked_words.matches(content)
    }

    /// Admissibility of one message as of now.
    pub fn verdict(
        &self,
        channel: &str,
        user: &UserId,
        message: &MessageId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Verdict {
        if self.is_always_ignored(user) {
            return Verdict::IgnoredUser;
        }
        if self.is_suppressed(channel, user, sent_at) {
            return Verdict::Banned;
        }
        if self.is_censored(channel, message) {
            return Verdict::Censored;
        }
        if self.contains_blocked_word(content) {
            return Verdict::BlockedWord;
        }
        Verdict::Admit
    }
}
