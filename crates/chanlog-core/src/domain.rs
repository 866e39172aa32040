use std::{fmt, str::FromStr};

use crate::{errors::Error, Result};

/// Default port for store endpoints given without one.
pub const DEFAULT_STORE_PORT: u16 = 5432;

/// Prefix required on channel names by the chat network.
pub const CHANNEL_SIGIL: char = '#';

/// A configured store address the pool may connect to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Accepts `host/port`, `host:port` and bare `host`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("empty store endpoint".to_string()));
        }

        let (host, port) = match s.split_once('/').or_else(|| s.rsplit_once(':')) {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    Error::Config(format!("invalid port in store endpoint: {s}"))
                })?;
                (host.trim(), port)
            }
            None => (s, DEFAULT_STORE_PORT),
        };

        if host.is_empty() {
            return Err(Error::Config(format!("missing host in store endpoint: {s}")));
        }

        Ok(Self::new(host, port))
    }
}

/// A channel name as joined on the chat network (always carries the sigil).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Prepends the channel sigil when the configured name lacks it.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with(CHANNEL_SIGIL) {
            Self(raw.to_string())
        } else {
            Self(format!("{CHANNEL_SIGIL}{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
