//! Reply text for inline commands.

use chrono::{DateTime, Local, Utc};

use crate::store::JournalEntry;

pub const HELP_TEXT: &str = "chanlog - channel journal\n\
~ help                  -- this message\n\
~ seen user             -- show last time user said something if available\n\
~ topic word            -- see messages mentioning a word\n\
~ today                 -- see messages from today\n\
~ date MM/DD/YYYY       -- see messages from date";

/// Short local timestamp, e.g. `3/9/24 1:05 PM`.
pub fn short_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%-m/%-d/%y %-I:%M %p")
        .to_string()
}

/// `~ seen` reply.
pub fn seen_line(user: &str, entry: &JournalEntry) -> String {
    format!(
        "{user} last seen {} saying: {}",
        short_time(entry.at),
        entry.text
    )
}

/// One line of a `~ today` / `~ date` listing.
pub fn day_line(entry: &JournalEntry) -> String {
    format!("{}: {}: {}", entry.sender, short_time(entry.at), entry.text)
}

/// One line of a `~ topic` listing.
pub fn topic_line(entry: &JournalEntry) -> String {
    format!(
        "{} @ {} said: {}",
        entry.sender,
        short_time(entry.at),
        entry.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> JournalEntry {
        JournalEntry {
            channel: "#rust".to_string(),
            sender: "alice".to_string(),
            host: "example.org".to_string(),
            at: Local
                .with_ymd_and_hms(2024, 3, 9, 13, 5, 0)
                .unwrap()
                .with_timezone(&Utc),
            text: "borrowck wins".to_string(),
        }
    }

    #[test]
    fn short_time_is_local_and_unpadded() {
        assert_eq!(short_time(entry().at), "3/9/24 1:05 PM");
    }

    #[test]
    fn reply_lines() {
        let e = entry();
        assert_eq!(
            seen_line("alice", &e),
            "alice last seen 3/9/24 1:05 PM saying: borrowck wins"
        );
        assert_eq!(day_line(&e), "alice: 3/9/24 1:05 PM: borrowck wins");
        assert_eq!(topic_line(&e), "alice @ 3/9/24 1:05 PM said: borrowck wins");
    }

    #[test]
    fn help_lists_every_command() {
        for cmd in ["help", "seen", "topic", "today", "date"] {
            assert!(HELP_TEXT.contains(&format!("~ {cmd}")), "{cmd}");
        }
    }
}
