//! `~` inline commands.
//!
//! A channel message whose first token is `~` is a command and is never
//! journalled, whether or not the sub-command is understood.

use chrono::NaiveDate;

use crate::{
    errors::Error,
    formatting::{day_line, seen_line, topic_line, HELP_TEXT},
    store::JournalStore,
    utils::today,
    Result,
};

pub const COMMAND_PREFIX: &str = "~";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Seen(String),
    Topic(String),
    Today,
    Date(NaiveDate),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Ordinary chatter, to be journalled.
    Message,
    /// Prefixed but not understood; dropped.
    Ignored,
    Command(Command),
}

/// Classify a channel message.
///
/// An unparseable `~ date` argument is an `InvalidCommand` error.
pub fn parse(text: &str) -> Result<Parsed> {
    let mut parts = text.split_whitespace();
    if parts.next() != Some(COMMAND_PREFIX) {
        return Ok(Parsed::Message);
    }

    // A lone prefix is ordinary chatter.
    let Some(name) = parts.next() else {
        return Ok(Parsed::Message);
    };
    let arg = parts.next();

    let cmd = match (name.to_lowercase().as_str(), arg) {
        ("help", _) => Command::Help,
        ("today", _) => Command::Today,
        ("seen", Some(user)) => Command::Seen(user.to_string()),
        ("topic", Some(word)) => Command::Topic(word.to_lowercase()),
        ("date", Some(raw)) => Command::Date(parse_date(raw)?),
        _ => return Ok(Parsed::Ignored),
    };
    Ok(Parsed::Command(cmd))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%m/%d/%Y")
        .map_err(|e| Error::InvalidCommand(format!("bad date `{raw}`, expected MM/DD/YYYY: {e}")))
}

/// Run a command against the journal of `channel`; returns the reply payloads.
pub async fn execute(cmd: &Command, channel: &str, store: &dyn JournalStore) -> Result<Vec<String>> {
    let replies = match cmd {
        Command::Help => vec![HELP_TEXT.to_string()],
        Command::Seen(user) => store
            .last_seen(channel, user)
            .await?
            .map(|entry| seen_line(user, &entry))
            .into_iter()
            .collect(),
        Command::Topic(word) => store
            .topic_entries(channel, word)
            .await?
            .iter()
            .map(topic_line)
            .collect(),
        Command::Today => day_listing(store, channel, today()).await?,
        Command::Date(day) => day_listing(store, channel, *day).await?,
    };
    Ok(replies)
}

async fn day_listing(store: &dyn JournalStore, channel: &str, day: NaiveDate) -> Result<Vec<String>> {
    Ok(store
        .messages_on(channel, day)
        .await?
        .iter()
        .map(day_line)
        .collect())
}
