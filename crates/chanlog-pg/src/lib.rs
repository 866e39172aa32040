//! PostgreSQL journal backend.
//!
//! One `PgJournalConnection` wraps a single `sqlx::PgConnection`; the core's
//! lease pool decides which endpoint serves each operation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use sqlx::{
    postgres::{PgConnectOptions, PgConnection},
    Connection,
};
use tokio::sync::Mutex;
use tracing::debug;

use chanlog_core::{
    domain::Endpoint,
    errors::Error,
    pool::{Connector, PoolConnection},
    store::{JournalConnection, JournalEntry},
    utils::{from_millis, journal_day, to_millis, topic_words, TOTAL_WORDS_KEY},
    Result,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chanlog_messages (
        channel TEXT    NOT NULL,
        day     INTEGER NOT NULL,
        at_ms   BIGINT  NOT NULL,
        sender  TEXT    NOT NULL,
        host    TEXT    NOT NULL,
        body    TEXT    NOT NULL,
        PRIMARY KEY (channel, day, at_ms, sender)
    )",
    "CREATE TABLE IF NOT EXISTS chanlog_users (
        sender  TEXT    NOT NULL,
        channel TEXT    NOT NULL,
        day     INTEGER NOT NULL,
        at_ms   BIGINT  NOT NULL,
        PRIMARY KEY (sender, channel)
    )",
    "CREATE TABLE IF NOT EXISTS chanlog_topics (
        channel TEXT    NOT NULL,
        word    TEXT    NOT NULL,
        at_ms   BIGINT  NOT NULL,
        sender  TEXT    NOT NULL,
        day     INTEGER NOT NULL,
        PRIMARY KEY (channel, word, at_ms, sender)
    )",
    "CREATE TABLE IF NOT EXISTS chanlog_topic_counters (
        word  TEXT   PRIMARY KEY,
        total BIGINT NOT NULL
    )",
];

/// (channel, sender, at_ms, host, body)
type EntryRow = (String, String, i64, String, String);

/// Opens one PostgreSQL connection per endpoint.
#[derive(Clone, Debug)]
pub struct PgConnector {
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl PgConnector {
    pub fn new(database: impl Into<String>, user: Option<String>, password: Option<String>) -> Self {
        Self {
            database: database.into(),
            user,
            password,
        }
    }

    fn options(&self, endpoint: &Endpoint) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .database(&self.database);
        if let Some(user) = &self.user {
            opts = opts.username(user);
        }
        if let Some(password) = &self.password {
            opts = opts.password(password);
        }
        opts
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgJournalConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<PgJournalConnection> {
        let conn = PgConnection::connect_with(&self.options(endpoint))
            .await
            .map_err(|e| map_err(endpoint, e))?;
        debug!(endpoint = %endpoint, "store connection opened");
        Ok(PgJournalConnection {
            endpoint: endpoint.clone(),
            conn: Mutex::new(Some(conn)),
            open: AtomicBool::new(true),
        })
    }
}

pub struct PgJournalConnection {
    endpoint: Endpoint,
    conn: Mutex<Option<PgConnection>>,
    open: AtomicBool,
}

impl PgJournalConnection {
    /// Connection-level failures mark the connection closed.
    ///
    /// A connection closed while this operation held it is dropped here, since
    /// `close()` does not wait for the operation.
    fn settle<T>(&self, slot: &mut Option<PgConnection>, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if e.is_connection_fault() {
                self.open.store(false, Ordering::SeqCst);
            }
        }
        if !self.open.load(Ordering::SeqCst) && slot.take().is_some() {
            debug!(endpoint = %self.endpoint, "store connection dropped after its last operation");
        }
        res
    }

    fn closed(&self) -> Error {
        Error::StoreConnection(format!("{}: connection closed", self.endpoint))
    }

    async fn fetch_entries(&self, sql: &str, channel: &str, key: Key<'_>) -> Result<Vec<JournalEntry>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed())?;

        let query = sqlx::query_as::<_, EntryRow>(sql).bind(channel);
        let query = match key {
            Key::Day(day) => query.bind(day),
            Key::Word(word) => query.bind(word),
            Key::Sender(sender) => query.bind(sender),
        };
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_err(&self.endpoint, e));
        self.settle(&mut guard, rows)?
            .into_iter()
            .map(entry_from)
            .collect()
    }
}

enum Key<'a> {
    Day(i32),
    Word(&'a str),
    Sender(&'a str),
}

#[async_trait]
impl PoolConnection for PgJournalConnection {
    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let conn = match self.conn.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                debug!(endpoint = %self.endpoint, "store connection busy; dropped when its operation ends");
                return;
            }
        };
        if let Some(conn) = conn {
            if let Err(e) = conn.close().await {
                debug!(endpoint = %self.endpoint, error = %e, "store connection closed uncleanly");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JournalConnection for PgJournalConnection {
    async fn ensure_schema(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed())?;
        let mut res = Ok(());
        for ddl in SCHEMA {
            res = sqlx::query(ddl)
                .execute(&mut *conn)
                .await
                .map(|_| ())
                .map_err(|e| map_err(&self.endpoint, e));
            if res.is_err() {
                break;
            }
        }
        self.settle(&mut guard, res)
    }

    async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| self.closed())?;
        let res = append_in_tx(conn, entry)
            .await
            .map_err(|e| map_err(&self.endpoint, e));
        self.settle(&mut guard, res)
    }

    async fn last_seen(&self, channel: &str, sender: &str) -> Result<Option<JournalEntry>> {
        let entries = self
            .fetch_entries(
                "SELECT m.channel, m.sender, m.at_ms, m.host, m.body
                 FROM chanlog_users u
                 JOIN chanlog_messages m
                   ON m.channel = u.channel AND m.day = u.day
                  AND m.at_ms = u.at_ms AND m.sender = u.sender
                 WHERE u.channel = $1 AND u.sender = $2",
                channel,
                Key::Sender(sender),
            )
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn messages_on(&self, channel: &str, day: NaiveDate) -> Result<Vec<JournalEntry>> {
        self.fetch_entries(
            "SELECT channel, sender, at_ms, host, body
             FROM chanlog_messages
             WHERE channel = $1 AND day = $2
             ORDER BY at_ms ASC, sender ASC",
            channel,
            Key::Day(day_key(day)),
        )
        .await
    }

    async fn topic_entries(&self, channel: &str, word: &str) -> Result<Vec<JournalEntry>> {
        let word = word.to_lowercase();
        self.fetch_entries(
            "SELECT m.channel, m.sender, m.at_ms, m.host, m.body
             FROM chanlog_topics t
             JOIN chanlog_messages m
               ON m.channel = t.channel AND m.day = t.day
              AND m.at_ms = t.at_ms AND m.sender = t.sender
             WHERE t.channel = $1 AND t.word = $2
             ORDER BY t.at_ms DESC, t.sender ASC",
            channel,
            Key::Word(&word),
        )
        .await
    }
}

async fn append_in_tx(conn: &mut PgConnection, entry: &JournalEntry) -> sqlx::Result<()> {
    let day = day_key(journal_day(entry.at));
    let at = to_millis(entry.at);
    let words = topic_words(&entry.text);

    let mut tx = conn.begin().await?;

    sqlx::query(
        "INSERT INTO chanlog_messages (channel, day, at_ms, sender, host, body)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (channel, day, at_ms, sender)
         DO UPDATE SET host = EXCLUDED.host, body = EXCLUDED.body",
    )
    .bind(&entry.channel)
    .bind(day)
    .bind(at)
    .bind(&entry.sender)
    .bind(&entry.host)
    .bind(&entry.text)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO chanlog_users (sender, channel, day, at_ms)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (sender, channel)
         DO UPDATE SET day = EXCLUDED.day, at_ms = EXCLUDED.at_ms",
    )
    .bind(&entry.sender)
    .bind(&entry.channel)
    .bind(day)
    .bind(at)
    .execute(&mut *tx)
    .await?;

    for word in &words {
        sqlx::query(
            "INSERT INTO chanlog_topics (channel, word, at_ms, sender, day)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT DO NOTHING",
        )
        .bind(&entry.channel)
        .bind(word)
        .bind(at)
        .bind(&entry.sender)
        .bind(day)
        .execute(&mut *tx)
        .await?;
    }

    for (word, n) in counter_increments(&words) {
        sqlx::query(
            "INSERT INTO chanlog_topic_counters (word, total) VALUES ($1, $2)
             ON CONFLICT (word)
             DO UPDATE SET total = chanlog_topic_counters.total + EXCLUDED.total",
        )
        .bind(word)
        .bind(n)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Per-word increments for one message, plus the running total.
fn counter_increments(words: &[String]) -> Vec<(&str, i64)> {
    let mut out: Vec<(&str, i64)> = Vec::new();
    for word in words {
        match out.iter_mut().find(|(w, _)| *w == word.as_str()) {
            Some((_, n)) => *n += 1,
            None => out.push((word.as_str(), 1)),
        }
    }
    if !words.is_empty() {
        out.push((TOTAL_WORDS_KEY, words.len() as i64));
    }
    out
}

fn day_key(day: NaiveDate) -> i32 {
    day.num_days_from_ce()
}

fn entry_from((channel, sender, at_ms, host, body): EntryRow) -> Result<JournalEntry> {
    Ok(JournalEntry {
        channel,
        sender,
        host,
        at: from_millis(at_ms)?,
        text: body,
    })
}

fn map_err(endpoint: &Endpoint, e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::Io(io) => Error::StoreConnection(format!("{endpoint}: {io}")),
        sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::StoreConnection(format!("{endpoint}: {e}")),
        other => Error::Store(format!("{endpoint}: {other}")),
    }
}
