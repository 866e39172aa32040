use std::{env, fs, path::Path, str::FromStr, time::Duration};

use crate::{
    domain::{ChannelName, Endpoint},
    errors::Error,
    messaging::throttled::ThrottleConfig,
    pool::PoolConfig,
    reconnect::{BackoffPolicy, SessionConfig},
    Result,
};

pub const DEFAULT_IRC_PORT: u16 = 6667;

/// Which `Connector` backs the journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(Error::Config(format!(
                "CHANLOG_STORE must be `postgres` or `memory`, got `{other}`"
            ))),
        }
    }
}

/// Typed process configuration, read from `CHANLOG_*` variables.
#[derive(Clone, Debug)]
pub struct Config {
    // Chat session
    pub nick: String,
    /// `host:port`, port defaulted when not configured.
    pub irc_server: String,
    pub channels: Vec<ChannelName>,
    pub nick_retry_limit: u32,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,

    // Store
    pub store: StoreBackend,
    pub store_endpoints: Vec<Endpoint>,
    pub db_name: String,
    pub db_user: Option<String>,
    pub db_password: Option<String>,

    // Pool
    pub lease_timeout: Duration,
    pub maintenance_interval: Duration,
    pub connect_timeout: Duration,

    // Outbound flood control
    pub send_global_interval: Duration,
    pub send_per_target_interval: Duration,
}

impl Config {
    /// Load from the process environment, after merging `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `load` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let millis = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| Error::Config(format!("{key} must be milliseconds, got `{v}`"))),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let nick = required(get("CHANLOG_NICK"), "CHANLOG_NICK")?;
        if nick.contains(char::is_whitespace) {
            return Err(Error::Config(format!(
                "CHANLOG_NICK must not contain whitespace: `{nick}`"
            )));
        }

        let irc_server = normalize_server(&required(
            get("CHANLOG_IRC_SERVER"),
            "CHANLOG_IRC_SERVER",
        )?)?;

        let channels: Vec<ChannelName> = parse_csv(get("CHANLOG_CHANNELS"))
            .iter()
            .map(|c| ChannelName::normalize(c))
            .collect();
        if channels.is_empty() {
            return Err(Error::Config(
                "CHANLOG_CHANNELS environment variable is required".to_string(),
            ));
        }

        let nick_retry_limit = match get("CHANLOG_NICK_RETRY_LIMIT") {
            Some(v) => v.trim().parse::<u32>().map_err(|_| {
                Error::Config(format!("CHANLOG_NICK_RETRY_LIMIT must be a number, got `{v}`"))
            })?,
            None => 10,
        };
        let reconnect_initial = millis("CHANLOG_RECONNECT_INITIAL_MS", 2_000)?;
        let reconnect_max = millis("CHANLOG_RECONNECT_MAX_MS", 60_000)?;
        if reconnect_initial.is_zero() || reconnect_max < reconnect_initial {
            return Err(Error::Config(
                "CHANLOG_RECONNECT_INITIAL_MS must be positive and not above CHANLOG_RECONNECT_MAX_MS"
                    .to_string(),
            ));
        }

        let store = match get("CHANLOG_STORE") {
            Some(v) => v.parse()?,
            None => StoreBackend::Postgres,
        };
        let store_endpoints = parse_csv(get("CHANLOG_STORE_ENDPOINTS"))
            .iter()
            .map(|s| s.parse::<Endpoint>())
            .collect::<Result<Vec<_>>>()?;
        if store_endpoints.is_empty() {
            return Err(Error::Config(
                "CHANLOG_STORE_ENDPOINTS environment variable is required".to_string(),
            ));
        }
        let db_name = get("CHANLOG_DB_NAME").unwrap_or_else(|| "chanlog".to_string());
        let db_user = get("CHANLOG_DB_USER");
        let db_password = get("CHANLOG_DB_PASSWORD");

        let lease_timeout = millis("CHANLOG_LEASE_TIMEOUT_MS", 10_000)?;
        if lease_timeout.is_zero() {
            return Err(Error::Config(
                "CHANLOG_LEASE_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        let maintenance_interval = millis("CHANLOG_MAINTENANCE_INTERVAL_MS", 30_000)?;
        if maintenance_interval.is_zero() {
            return Err(Error::Config(
                "CHANLOG_MAINTENANCE_INTERVAL_MS must be positive".to_string(),
            ));
        }
        let connect_timeout = millis("CHANLOG_CONNECT_TIMEOUT_MS", 5_000)?;

        let send_global_interval = millis("CHANLOG_SEND_GLOBAL_INTERVAL_MS", 500)?;
        let send_per_target_interval = millis("CHANLOG_SEND_PER_TARGET_INTERVAL_MS", 1_000)?;

        Ok(Self {
            nick,
            irc_server,
            channels,
            nick_retry_limit,
            reconnect_initial,
            reconnect_max,
            store,
            store_endpoints,
            db_name,
            db_user,
            db_password,
            lease_timeout,
            maintenance_interval,
            connect_timeout,
            send_global_interval,
            send_per_target_interval,
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            maintenance_interval: self.maintenance_interval,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            global_min_interval: self.send_global_interval,
            per_target_min_interval: self.send_per_target_interval,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server: self.irc_server.clone(),
            nick: self.nick.clone(),
            channels: self.channels.clone(),
            backoff: BackoffPolicy {
                initial: self.reconnect_initial,
                max: self.reconnect_max,
                ..BackoffPolicy::default()
            },
            nick_retry_limit: self.nick_retry_limit,
        }
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value.ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn normalize_server(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let (host, port) = match raw.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port in CHANLOG_IRC_SERVER: {raw}")))?;
            (host, port)
        }
        None => (raw, DEFAULT_IRC_PORT),
    };
    if host.is_empty() {
        return Err(Error::Config(format!(
            "missing host in CHANLOG_IRC_SERVER: {raw}"
        )));
    }
    Ok(format!("{host}:{port}"))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
