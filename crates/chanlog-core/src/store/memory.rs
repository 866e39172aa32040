//! In-process journal backend.
//!
//! Every connection of one `MemoryConnector` shares the same tables, like nodes
//! of a replicated cluster. Endpoints can be switched unreachable to simulate
//! outages: connects fail and open connections to that endpoint break on next use.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::{
    domain::Endpoint,
    pool::{Connector, PoolConnection},
    store::{JournalConnection, JournalEntry},
    utils::{from_millis, journal_day, to_millis, topic_words, TOTAL_WORDS_KEY},
    Error, Result,
};

/// (channel, day, at millis, sender)
type MessageKey = (String, NaiveDate, i64, String);

#[derive(Default)]
struct Tables {
    schema_ready: bool,
    messages: BTreeMap<MessageKey, (String, String)>,
    // (sender, channel) -> (day, at millis)
    last_seen: HashMap<(String, String), (NaiveDate, i64)>,
    // (channel, word, at millis, sender)
    topics: BTreeSet<(String, String, i64, String)>,
    topic_counters: HashMap<String, u64>,
}

#[derive(Default)]
struct Cluster {
    tables: Mutex<Tables>,
    unreachable: Mutex<HashSet<Endpoint>>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    cluster: Arc<Cluster>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        let mut down = self.cluster.unreachable.lock().await;
        if reachable {
            down.remove(endpoint);
        } else {
            down.insert(endpoint.clone());
        }
    }

    /// Current value of a topic counter (`TOTAL_WORDS_KEY` for the total).
    pub async fn topic_count(&self, word: &str) -> u64 {
        let tables = self.cluster.tables.lock().await;
        tables.topic_counters.get(word).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MemoryConnection> {
        if self.cluster.unreachable.lock().await.contains(endpoint) {
            return Err(Error::StoreConnection(format!(
                "{endpoint}: connection refused"
            )));
        }
        Ok(MemoryConnection {
            endpoint: endpoint.clone(),
            cluster: self.cluster.clone(),
            open: AtomicBool::new(true),
        })
    }
}

pub struct MemoryConnection {
    endpoint: Endpoint,
    cluster: Arc<Cluster>,
    open: AtomicBool,
}

impl MemoryConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Fails (and breaks the connection) when closed or the endpoint went away.
    async fn check(&self) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::StoreConnection(format!(
                "{}: connection closed",
                self.endpoint
            )));
        }
        if self.cluster.unreachable.lock().await.contains(&self.endpoint) {
            self.open.store(false, Ordering::SeqCst);
            return Err(Error::StoreConnection(format!(
                "{}: connection reset",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PoolConnection for MemoryConnection {
    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn entry_from(
    (channel, _day, at, sender): &MessageKey,
    (host, text): &(String, String),
) -> Result<JournalEntry> {
    Ok(JournalEntry {
        channel: channel.clone(),
        sender: sender.clone(),
        host: host.clone(),
        at: from_millis(*at)?,
        text: text.clone(),
    })
}

fn require_schema(tables: &Tables) -> Result<()> {
    if tables.schema_ready {
        Ok(())
    } else {
        Err(Error::Store("journal schema not provisioned".to_string()))
    }
}

#[async_trait]
impl JournalConnection for MemoryConnection {
    async fn ensure_schema(&self) -> Result<()> {
        self.check().await?;
        self.cluster.tables.lock().await.schema_ready = true;
        Ok(())
    }

    async fn append(&self, entry: &JournalEntry) -> Result<()> {
        self.check().await?;
        let mut tables = self.cluster.tables.lock().await;
        require_schema(&tables)?;

        let day = journal_day(entry.at);
        let at = to_millis(entry.at);
        tables.messages.insert(
            (entry.channel.clone(), day, at, entry.sender.clone()),
            (entry.host.clone(), entry.text.clone()),
        );
        tables
            .last_seen
            .insert((entry.sender.clone(), entry.channel.clone()), (day, at));

        let words = topic_words(&entry.text);
        for word in &words {
            tables.topics.insert((
                entry.channel.clone(),
                word.clone(),
                at,
                entry.sender.clone(),
            ));
            *tables.topic_counters.entry(word.clone()).or_default() += 1;
        }
        if !words.is_empty() {
            *tables
                .topic_counters
                .entry(TOTAL_WORDS_KEY.to_string())
                .or_default() += words.len() as u64;
        }
        Ok(())
    }

    async fn last_seen(&self, channel: &str, sender: &str) -> Result<Option<JournalEntry>> {
        self.check().await?;
        let tables = self.cluster.tables.lock().await;
        require_schema(&tables)?;

        let Some((day, at)) = tables
            .last_seen
            .get(&(sender.to_string(), channel.to_string()))
            .copied()
        else {
            return Ok(None);
        };

        let key = (channel.to_string(), day, at, sender.to_string());
        match tables.messages.get(&key) {
            Some(row) => Ok(Some(entry_from(&key, row)?)),
            None => Ok(None),
        }
    }

    async fn messages_on(&self, channel: &str, day: NaiveDate) -> Result<Vec<JournalEntry>> {
        self.check().await?;
        let tables = self.cluster.tables.lock().await;
        require_schema(&tables)?;

        tables
            .messages
            .iter()
            .filter(|((c, d, _, _), _)| c == channel && *d == day)
            .map(|(key, row)| entry_from(key, row))
            .collect()
    }

    async fn topic_entries(&self, channel: &str, word: &str) -> Result<Vec<JournalEntry>> {
        self.check().await?;
        let tables = self.cluster.tables.lock().await;
        require_schema(&tables)?;

        let word = word.to_lowercase();
        let mut out = Vec::new();
        for (c, w, at, sender) in tables.topics.iter().rev() {
            if c != channel || *w != word {
                continue;
            }
            let key = (c.clone(), journal_day(from_millis(*at)?), *at, sender.clone());
            if let Some(row) = tables.messages.get(&key) {
                out.push(entry_from(&key, row)?);
            }
        }
        Ok(out)
    }
}
