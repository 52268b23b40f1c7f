// src/services/mod.rs

pub mod committer;    // one delayed-commit unit per admitted message
pub mod delay_queue;
pub mod dispatcher;   // the only consumer of the delay queue
pub mod moderation;
pub mod pending;

// Public API
pub use committer::{CommitOutcome, CommitSettings, Committer};
pub use delay_queue::DelayQueue;
pub use dispatcher::Dispatcher;
pub use moderation::{BlockedWords, ModerationIndex, SuppressionWindow, Verdict};
pub use pending::{PendingGuard, PendingKey, PendingWrites};
