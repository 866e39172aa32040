/// Core error type for the journalling bot.
///
/// Adapter crates (IRC, Postgres) map their specific errors into this type so
/// the core can tell connection faults (discard + reconnect) from everything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no store endpoint reachable: {endpoints}")]
    PoolExhausted { endpoints: String },

    #[error("connection pool terminated")]
    PoolTerminated,

    #[error("nickname in use: {0}")]
    NickInUse(String),

    #[error("chat error: {0}")]
    Chat(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("store connection lost: {0}")]
    StoreConnection(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Whether the error means the underlying store connection can no longer be trusted.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::StoreConnection(_) | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
