//! Database access layer
//!
//! Provides SQLite-backed storage for classification records and the
//! durable alert mirror.

pub mod alerts;
pub mod classifications;
pub mod init;
pub mod retry;
