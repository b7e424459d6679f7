//! # Formats
//!
//! Serialization formats for moving event logs in and out of binmeta.

pub mod persistence;

pub use persistence::{PersistenceHeader, checksum, events_from_bytes, events_to_bytes};
