//! shelfsync: a self-hosted reading tracker for e-reader devices.
//!
//! Devices such as KOReader report what they hold, what they read and where
//! they are in each document. The server keeps one shared document catalog,
//! an append-only activity ledger and progress history per user, and a
//! periodically rebuilt statistics cache.
//!
//! # Features
//!
//! - Document inventory reconciliation (want, give, delete)
//! - Full sync opt-in per device
//! - Atomic activity batch uploads
//! - Last-writer-wins reading progress across devices
//! - Timezone-aware day and week streaks
//! - 30 day reading totals, words per minute and leaderboards

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// HTTP server.
pub mod server;
/// Statistics cache.
pub mod stats;
/// Device sync protocol.
pub mod sync;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
