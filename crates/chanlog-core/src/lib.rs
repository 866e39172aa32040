//! Core of the channel journalling bot.
//!
//! The chat network and the durable store live behind ports (traits) implemented
//! in adapter crates. This crate owns the lease pool for store connections, the
//! reconnect controller for the chat session and the outbound delivery queue.

pub mod bot;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod pool;
pub mod reconnect;
pub mod store;
pub mod utils;

pub use errors::{Error, Result};

#[cfg(test)]
pub(crate) mod testing;
