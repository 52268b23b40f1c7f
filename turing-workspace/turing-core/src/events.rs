// turing-core/src/events.rs
//! Chat events as they travel through the delay queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw chat-platform user identifier. Never written to storage; see
/// [`crate::memory::hash_user`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Platform message identifier, used to match deletions to messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event category. Variant order is the dequeue order among events that
/// became ready at the same time; see [`EventKind::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ban,
    Unban,
    Censor,
    Message,
}

impl EventKind {
    /// Lower dequeues first. Bans and unbans share a level so an unban stays
    /// behind the ban it lifts.
    pub fn priority(self) -> u8 {
        match self {
            EventKind::Ban | EventKind::Unban => 0,
            EventKind::Censor => 1,
            EventKind::Message => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ban => "ban",
            EventKind::Unban => "unban",
            EventKind::Censor => "censor",
            EventKind::Message => "message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Ban or timeout. `expires` is `None` for a permanent ban.
    Ban {
        user: UserId,
        expires: Option<DateTime<Utc>>,
    },
    /// Closes the user's open ban or timeout as of the event time.
    Unban {
        user: UserId,
    },
    Censor {
        message: MessageId,
    },
    Message {
        user: UserId,
        message: MessageId,
        content: String,
    },
}

/// One chat event for one channel. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    channel: String,
    timestamp: DateTime<Utc>,
    payload: Payload,
}

impl EventEnvelope {
    pub fn message(
        channel: impl Into<String>,
        user: impl Into<UserId>,
        message: impl Into<MessageId>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload: Payload::Message {
                user: user.into(),
                message: message.into(),
                content: content.into(),
            },
        }
    }

    pub fn ban(
        channel: impl Into<String>,
        user: impl Into<UserId>,
        expires: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload: Payload::Ban {
                user: user.into(),
                expires,
            },
        }
    }

    pub fn unban(
        channel: impl Into<String>,
        user: impl Into<UserId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload: Payload::Unban { user: user.into() },
        }
    }

    pub fn censor(
        channel: impl Into<String>,
        message: impl Into<MessageId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel: channel.into(),
            timestamp,
            payload: Payload::Censor {
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            Payload::Ban { .. } => EventKind::Ban,
            Payload::Unban { .. } => EventKind::Unban,
            Payload::Censor { .. } => EventKind::Censor,
            Payload::Message { .. } => EventKind::Message,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (String, DateTime<Utc>, Payload) {
        (self.channel, self.timestamp, self.payload)
    }
}
