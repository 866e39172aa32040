use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::ChannelName,
    messaging::port::{ChatHandler, ChatPort},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two outbound messages (server flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between messages to the same destination.
    pub per_target_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(500),
            per_target_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait required before sending.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// ChatPort decorator that spaces outbound messages.
///
/// IRC servers disconnect clients that flood; multi-line replies like `~ today`
/// would otherwise trip that. Only `send_message` is throttled.
pub struct ThrottledChat {
    inner: Arc<dyn ChatPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_target: Mutex<HashMap<String, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledChat {
    pub fn new(inner: Arc<dyn ChatPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_target: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, destination: &str) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_target.lock().await;
        map.entry(destination.to_lowercase())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_target_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, destination: &str) {
        let global_wait = { self.global.lock().await.reserve() };
        let target_wait = {
            let lim = self.limiter_for(destination).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(target_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl ChatPort for ThrottledChat {
    async fn connect(&self, server: &str, nick: &str) -> Result<()> {
        self.inner.connect(server, nick).await
    }

    async fn join_channel(&self, channel: &ChannelName) -> Result<()> {
        self.inner.join_channel(channel).await
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<()> {
        self.throttle(destination).await;
        self.inner.send_message(destination, text).await
    }

    async fn quit(&self, reason: &str) -> Result<()> {
        self.inner.quit(reason).await
    }

    fn set_handler(&self, handler: Arc<dyn ChatHandler>) {
        self.inner.set_handler(handler);
    }
}
