// src/commands/mod.rs
pub mod init;
mod api;

pub use api::Turing;

pub use init::{ensure_initialized_once, turing_root, InitReport};
