//! IRC line framing (RFC 1459 subset).

/// Payload bytes allowed per outbound PRIVMSG; leaves room for the prefix the
/// server adds when relaying inside the 512 byte line limit.
pub const MAX_TEXT_BYTES: usize = 400;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse one line without its terminator. Tags (`@...`) are skipped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(&['\r', '\n'][..]);
        if let Some(tagged) = rest.strip_prefix('@') {
            rest = tagged.split_once(' ')?.1.trim_start();
        }

        let prefix = match rest.strip_prefix(':') {
            Some(p) => {
                let (prefix, tail) = p.split_once(' ')?;
                rest = tail.trim_start();
                Some(prefix.to_string())
            }
            None => None,
        };

        let (command, mut tail) = match rest.split_once(' ') {
            Some((c, t)) => (c, t),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            tail = tail.trim_start_matches(' ');
            if tail.is_empty() {
                break;
            }
            if let Some(trailing) = tail.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match tail.split_once(' ') {
                Some((p, t)) => {
                    params.push(p.to_string());
                    tail = t;
                }
                None => {
                    params.push(tail.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_uppercase(),
            params,
        })
    }

    pub fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }

    /// `nick`, `user` and `host` from a `nick!user@host` prefix.
    pub fn source(&self) -> Option<(&str, &str, &str)> {
        let prefix = self.prefix.as_deref()?;
        let (nick, rest) = prefix.split_once('!').unwrap_or((prefix, ""));
        let (user, host) = rest.split_once('@').unwrap_or((rest, ""));
        Some((nick, user, host))
    }
}

pub fn is_channel(target: &str) -> bool {
    target.starts_with(&['#', '&', '+', '!'][..])
}

/// PRIVMSG lines for `text`: one per non-empty line, long lines split on char
/// boundaries.
pub fn privmsg_lines(target: &str, text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        for chunk in chunks(line, MAX_TEXT_BYTES) {
            out.push(format!("PRIVMSG {target} :{chunk}"));
        }
    }
    out
}

fn chunks(line: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = line;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        out.push(head);
        rest = tail;
    }
    out.push(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_privmsg_with_source() {
        let msg = Message::parse(":alice!al@host.example PRIVMSG #rust :hello there\r\n").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#rust", "hello there"]);
        assert_eq!(msg.source(), Some(("alice", "al", "host.example")));
    }

    #[test]
    fn parses_numerics_and_ping() {
        let msg = Message::parse(":irc.example.org 433 * logger :Nickname is already in use").unwrap();
        assert_eq!(msg.command, "433");
        assert_eq!(msg.param(1), Some("logger"));

        let ping = Message::parse("PING :token123").unwrap();
        assert_eq!(ping.prefix, None);
        assert_eq!(ping.params, vec!["token123"]);
    }

    #[test]
    fn skips_tags_and_rejects_garbage() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :srv NOTICE * :hi").unwrap();
        assert_eq!(msg.command, "NOTICE");
        assert!(Message::parse("").is_none());
        assert!(Message::parse(":onlyprefix").is_none());
    }

    #[test]
    fn multi_line_text_becomes_several_privmsgs() {
        assert_eq!(
            privmsg_lines("bob", "one\n\ntwo\r\n"),
            vec!["PRIVMSG bob :one", "PRIVMSG bob :two"]
        );
    }

    #[test]
    fn long_lines_split_on_char_boundaries() {
        let text = "é".repeat(MAX_TEXT_BYTES);
        let lines = privmsg_lines("bob", &text);
        assert_eq!(lines.len(), 2);
        let rebuilt: String = lines
            .iter()
            .map(|l| l.trim_start_matches("PRIVMSG bob :"))
            .collect();
        assert_eq!(rebuilt, text);
    }
}
