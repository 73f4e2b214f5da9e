//! Volmap Library
//!
//! Exposes the cache-first loader, the events API client and the CLI pieces
//! for use by the binary and in integration tests.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod events;
pub mod refresh;
pub mod session;
