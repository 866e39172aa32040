//! Event handler wiring chat events to the journal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    commands::{self, Parsed},
    messaging::{port::ChatHandler, queue::DeliveryQueue, types::IncomingMessage},
    reconnect::ReconnectController,
    store::{JournalEntry, JournalStore},
    Result,
};

/// Journals channel chatter, answers `~` commands, and reports session
/// events to the reconnect controller.
pub struct JournalBot {
    store: Arc<dyn JournalStore>,
    outbox: Arc<DeliveryQueue>,
    controller: Arc<ReconnectController>,
}

impl JournalBot {
    pub fn new(
        store: Arc<dyn JournalStore>,
        outbox: Arc<DeliveryQueue>,
        controller: Arc<ReconnectController>,
    ) -> Self {
        Self {
            store,
            outbox,
            controller,
        }
    }

    async fn handle(&self, msg: &IncomingMessage) -> Result<()> {
        match commands::parse(&msg.text)? {
            Parsed::Message => {
                self.store
                    .record(JournalEntry {
                        channel: msg.channel.clone(),
                        sender: msg.sender.clone(),
                        host: msg.host.clone(),
                        at: Utc::now(),
                        text: msg.text.clone(),
                    })
                    .await
            }
            Parsed::Ignored => {
                debug!(channel = %msg.channel, sender = %msg.sender, "unrecognized command");
                Ok(())
            }
            Parsed::Command(cmd) => {
                let replies = commands::execute(&cmd, &msg.channel, self.store.as_ref()).await?;
                debug!(?cmd, replies = replies.len(), "command answered");
                for reply in replies {
                    self.outbox.post(&msg.sender, &reply);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ChatHandler for JournalBot {
    async fn on_message(&self, msg: IncomingMessage) {
        if let Err(e) = self.handle(&msg).await {
            warn!(
                channel = %msg.channel,
                sender = %msg.sender,
                text = %msg.text,
                error = %e,
                "failed processing message"
            );
        }
    }

    async fn on_disconnect(&self) {
        self.controller.session_lost().await;
    }

    async fn on_nick_collision(&self, nick: &str) {
        self.controller.nick_collision(nick).await;
    }
}
