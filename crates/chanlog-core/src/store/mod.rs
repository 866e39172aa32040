//! Durable journal port.
//!
//! `JournalConnection` is the query surface of one pooled store connection;
//! `JournalStore` is what the bot talks to. `Journal` bridges the two through
//! the lease pool.

pub mod journal;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{pool::PoolConnection, utils::journal_day, Result};

pub use journal::{ExpiredLeaseLogger, Journal};
pub use memory::{MemoryConnection, MemoryConnector};

/// One observed channel message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub channel: String,
    pub sender: String,
    pub host: String,
    pub at: DateTime<Utc>,
    pub text: String,
}

impl JournalEntry {
    pub fn day(&self) -> NaiveDate {
        journal_day(self.at)
    }
}

/// Query surface of a single store connection.
///
/// Implementations index topic words on `append` and keep the per-user
/// last-seen pointer current.
#[async_trait]
pub trait JournalConnection: PoolConnection {
    /// Create keyspace/tables if missing. Safe to run on every start.
    async fn ensure_schema(&self) -> Result<()>;

    async fn append(&self, entry: &JournalEntry) -> Result<()>;

    async fn last_seen(&self, channel: &str, sender: &str) -> Result<Option<JournalEntry>>;

    /// Messages of one journal day, oldest first.
    async fn messages_on(&self, channel: &str, day: NaiveDate) -> Result<Vec<JournalEntry>>;

    /// Messages containing `word`, newest first.
    async fn topic_entries(&self, channel: &str, word: &str) -> Result<Vec<JournalEntry>>;
}

/// Journal operations used by the bot.
#[async_trait]
pub trait JournalStore: Send + Sync {
    async fn record(&self, entry: JournalEntry) -> Result<()>;
    async fn last_seen(&self, channel: &str, sender: &str) -> Result<Option<JournalEntry>>;
    async fn messages_on(&self, channel: &str, day: NaiveDate) -> Result<Vec<JournalEntry>>;
    async fn topic_entries(&self, channel: &str, word: &str) -> Result<Vec<JournalEntry>>;
}
