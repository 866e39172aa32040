use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex::Regex;

use crate::{errors::Error, Result};

/// Counter key holding the number of indexed words across all messages.
pub const TOTAL_WORDS_KEY: &str = ":TOTAL:";

fn word_separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+|\.|,|\?|:").expect("valid regex"))
}

/// Split a message into the lower-cased words indexed for `~ topic`.
pub fn topic_words(text: &str) -> Vec<String> {
    word_separators()
        .split(text)
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Journal partition for a timestamp: the local calendar day.
pub fn journal_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Today's journal partition.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Store(format!("timestamp out of range: {ms}")))
}
