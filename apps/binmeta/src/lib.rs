//! # binmeta
//!
//! The application layer over `binmeta-core`: an axum HTTP API, a clap CLI
//! and the TOML configuration both share.

pub mod api;
pub mod cli;
pub mod config;

pub use config::{AppConfig, ServerConfig};
