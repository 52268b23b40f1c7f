//! Moderation-aware chat ingestion feeding per-channel Markov corpora.
//!
//! Chat events go through a delay queue, moderation is applied as it arrives,
//! and each admissible message is written and learned only after a grace
//! window in which a late ban or deletion can still cancel it.

pub mod commands;
pub mod config;
pub mod corpus;
pub mod error;
pub mod events;
pub mod memory;
pub mod services;

pub use commands::Turing;
pub use config::CoreConfig;
pub use error::{CacheError, GenerateError, StoreError};
pub use events::{EventEnvelope, EventKind, MessageId, Payload, UserId};
