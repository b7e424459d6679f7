//! # Storage
//!
//! Persistent event log backends.

pub mod redb_log;

pub use redb_log::RedbEventLog;
