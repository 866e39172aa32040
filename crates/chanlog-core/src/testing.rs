//! Test doubles shared by the core's unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    domain::ChannelName,
    messaging::{
        port::{ChatHandler, ChatPort},
        types::OutboundItem,
    },
    Result,
};

/// Scriptable `ChatPort` that records everything it is asked to do.
#[derive(Default)]
pub(crate) struct FakeChat {
    connects: Mutex<Vec<(String, String)>>,
    connect_script: Mutex<VecDeque<Result<()>>>,
    join_script: Mutex<VecDeque<Result<()>>>,
    joins: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutboundItem>>,
    send_attempts: AtomicUsize,
    send_delay: Mutex<Duration>,
    fail_payload: Mutex<Option<String>>,
    quits: AtomicUsize,
    handler: Mutex<Option<Arc<dyn ChatHandler>>>,
}

impl FakeChat {
    /// Results for the next connects, in order; `Ok(())` once exhausted.
    pub(crate) fn script_connects(&self, results: Vec<Result<()>>) {
        self.connect_script.lock().unwrap().extend(results);
    }

    pub(crate) fn script_joins(&self, results: Vec<Result<()>>) {
        self.join_script.lock().unwrap().extend(results);
    }

    pub(crate) fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_payload(&self, payload: &str) {
        *self.fail_payload.lock().unwrap() = Some(payload.to_string());
    }

    pub(crate) fn connects(&self) -> Vec<(String, String)> {
        self.connects.lock().unwrap().clone()
    }

    pub(crate) fn joins(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    pub(crate) fn sent(&self) -> Vec<OutboundItem> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ChatPort for FakeChat {
    async fn connect(&self, server: &str, nick: &str) -> Result<()> {
        self.connects
            .lock()
            .unwrap()
            .push((server.to_string(), nick.to_string()));
        let scripted = self.connect_script.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }

    async fn join_channel(&self, channel: &ChannelName) -> Result<()> {
        let scripted = self.join_script.lock().unwrap().pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }
        self.joins.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if self.fail_payload.lock().unwrap().as_deref() == Some(text) {
            return Err(crate::Error::Chat("scripted send failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push(OutboundItem::new(destination, text));
        Ok(())
    }

    async fn quit(&self, _reason: &str) -> Result<()> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_handler(&self, handler: Arc<dyn ChatHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}
