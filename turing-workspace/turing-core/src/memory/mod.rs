// turing-core/src/memory/mod.rs
pub mod in_memory;
pub mod sqlite;
pub mod store;

pub use in_memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{hash_user, BanRecord, MessageRecord, MessageStore};
