//! Chat session supervision.
//!
//! The controller owns the session state machine
//! (`Disconnected → Connecting → Joining → Active`) and, on session loss, one
//! recovery task that reconnects with geometric backoff and rejoins every
//! configured channel.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{domain::ChannelName, messaging::port::ChatPort, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Joining,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            factor: 1.5,
            max: Duration::from_secs(60),
        }
    }
}

/// Growing delay between reconnect attempts, capped at the policy maximum.
#[derive(Clone, Debug)]
pub struct Backoff {
    current: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let factor = if policy.factor.is_finite() && policy.factor >= 1.0 {
            policy.factor
        } else {
            1.0
        };
        Self {
            current: policy.initial.min(policy.max),
            factor,
            max: policy.max,
        }
    }

    /// Delay to sleep before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// `host[:port]` of the chat server.
    pub server: String,
    pub nick: String,
    pub channels: Vec<ChannelName>,
    pub backoff: BackoffPolicy,
    /// Renames tried when the nickname is taken at startup.
    pub nick_retry_limit: u32,
}

pub struct ReconnectController {
    chat: Arc<dyn ChatPort>,
    cfg: SessionConfig,
    nick: Mutex<String>,
    state: watch::Sender<SessionState>,
    recovering: AtomicBool,
    disconnects: AtomicU64,
    recovery: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ReconnectController {
    pub fn new(chat: Arc<dyn ChatPort>, cfg: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            chat,
            nick: Mutex::new(cfg.nick.clone()),
            cfg,
            state,
            recovering: AtomicBool::new(false),
            disconnects: AtomicU64::new(0),
            recovery: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Nickname the next connect will register with.
    pub async fn nick(&self) -> String {
        self.nick.lock().await.clone()
    }

    pub fn channels(&self) -> &[ChannelName] {
        &self.cfg.channels
    }

    /// Initial connect.
    ///
    /// A taken nickname gets a random digit appended and is retried at once,
    /// up to `nick_retry_limit` times. Any other failure is returned.
    pub async fn start(&self) -> Result<()> {
        let mut renames = 0u32;
        loop {
            let nick = self.nick().await;
            self.set_state(SessionState::Connecting);
            match self.chat.connect(&self.cfg.server, &nick).await {
                Ok(()) => break,
                Err(Error::NickInUse(_)) if renames < self.cfg.nick_retry_limit => {
                    renames += 1;
                    let next = self.rename().await;
                    warn!(taken = %nick, next = %next, "nickname in use; retrying");
                }
                Err(e) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.join_all().await {
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }
        info!(server = %self.cfg.server, nick = %self.nick().await, "chat session active");
        Ok(())
    }

    /// Session loss signal. Starts recovery unless one is already running.
    pub async fn session_lost(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.disconnects.fetch_add(1, Ordering::SeqCst);

        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("session loss while recovery is running; ignored");
            return;
        }

        self.set_state(SessionState::Disconnected);
        warn!(server = %self.cfg.server, "chat session lost; starting recovery");

        let this = self.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move { this.recover(cancel).await });
        *self.recovery.lock().await = Some(handle);
    }

    /// The server rejected our nickname mid-session; pick another for the next connect.
    pub async fn nick_collision(&self, nick: &str) {
        let current = self.nick().await;
        if current != nick {
            return;
        }
        let next = self.rename().await;
        warn!(taken = %nick, next = %next, "nickname collision reported");
    }

    /// Cancel recovery and wait for it. An in-flight attempt finishes first.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.recovery.lock().await.take();
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(error = %e, "recovery task ended abnormally");
            }
        }
    }

    async fn recover(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.cfg.backoff);
        let mut attempt = 0u32;

        loop {
            let delay = backoff.next_delay();
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(delay) => {}
            }

            attempt += 1;
            let generation = self.disconnects.load(Ordering::SeqCst);
            match self.reestablish().await {
                Ok(()) => {
                    self.recovering.store(false, Ordering::SeqCst);
                    // A loss reported while we were rejoining was swallowed by
                    // the guard; pick it up unless a fresh task already did.
                    let lost_again = self.disconnects.load(Ordering::SeqCst) != generation;
                    if !lost_again
                        || self
                            .recovering
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                    {
                        info!(attempt, "chat session re-established");
                        return;
                    }
                    warn!(attempt, "chat session lost again while rejoining");
                    self.set_state(SessionState::Disconnected);
                }
                Err(e) => {
                    self.set_state(SessionState::Disconnected);
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        self.recovering.store(false, Ordering::SeqCst);
        debug!("recovery cancelled");
    }

    async fn reestablish(&self) -> Result<()> {
        let nick = self.nick().await;
        self.set_state(SessionState::Connecting);
        self.chat.connect(&self.cfg.server, &nick).await?;
        self.join_all().await
    }

    async fn join_all(&self) -> Result<()> {
        self.set_state(SessionState::Joining);
        for channel in &self.cfg.channels {
            self.chat.join_channel(channel).await?;
            debug!(channel = %channel, "joined");
        }
        self.set_state(SessionState::Active);
        Ok(())
    }

    async fn rename(&self) -> String {
        let suffix = rand::thread_rng().gen_range(0..10);
        let mut nick = self.nick.lock().await;
        nick.push_str(&suffix.to_string());
        nick.clone()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "session state");
        }
    }
}
