use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::ChannelName,
    messaging::types::IncomingMessage,
    Result,
};

/// Narrow surface of a chat-network client.
///
/// IRC is the only implementation today; the core never depends on protocol
/// framing.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Open a session and register as `nick`.
    ///
    /// Fails with `Error::NickInUse` when the server rejects the nickname.
    async fn connect(&self, server: &str, nick: &str) -> Result<()>;

    async fn join_channel(&self, channel: &ChannelName) -> Result<()>;

    async fn send_message(&self, destination: &str, text: &str) -> Result<()>;

    /// Leave the network. No `on_disconnect` is raised for a local quit.
    async fn quit(&self, reason: &str) -> Result<()>;

    /// Register the receiver of inbound events.
    fn set_handler(&self, handler: Arc<dyn ChatHandler>);
}

/// Receiver of inbound chat events.
#[async_trait]
pub trait ChatHandler: Send + Sync {
    async fn on_message(&self, msg: IncomingMessage);

    async fn on_disconnect(&self);

    /// The server rejected `nick` after registration.
    async fn on_nick_collision(&self, nick: &str);
}
