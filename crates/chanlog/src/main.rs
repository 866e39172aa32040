use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use chanlog_core::{
    bot::JournalBot,
    config::{Config, StoreBackend},
    messaging::{port::ChatPort, queue::DeliveryQueue, throttled::ThrottledChat},
    pool::{Connector, LeasePool},
    reconnect::ReconnectController,
    store::{Journal, JournalConnection, MemoryConnector},
};
use chanlog_irc::IrcClient;
use chanlog_pg::PgConnector;

const REALNAME: &str = "chanlog channel journal";
const QUIT_REASON: &str = "chanlog shutting down";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chanlog_core::logging::init("chanlog")?;

    let cfg = Config::load()?;
    match cfg.store {
        StoreBackend::Postgres => {
            let connector =
                PgConnector::new(&cfg.db_name, cfg.db_user.clone(), cfg.db_password.clone());
            run(cfg, connector).await
        }
        StoreBackend::Memory => {
            warn!("journal kept in memory; nothing survives a restart");
            run(cfg, MemoryConnector::new()).await
        }
    }
}

async fn run<K>(cfg: Config, connector: K) -> anyhow::Result<()>
where
    K: Connector,
    K::Connection: JournalConnection,
{
    let mut signal = ShutdownSignal::install().context("installing signal handlers")?;

    let pool = Arc::new(
        LeasePool::connect(connector, cfg.store_endpoints.clone(), cfg.pool_config())
            .await
            .context("opening store connections")?,
    );
    let journal = open_journal(pool.clone(), cfg.lease_timeout).await?;

    let chat: Arc<dyn ChatPort> = Arc::new(ThrottledChat::new(
        Arc::new(IrcClient::new(REALNAME)),
        cfg.throttle_config(),
    ));
    let outbox = Arc::new(DeliveryQueue::new());
    let controller = Arc::new(ReconnectController::new(
        chat.clone(),
        cfg.session_config(),
    ));
    chat.set_handler(Arc::new(JournalBot::new(
        Arc::new(journal),
        outbox.clone(),
        controller.clone(),
    )));
    outbox.start(chat.clone()).await;

    if let Err(e) = controller.start().await {
        shutdown(&controller, chat.as_ref(), &outbox, &pool).await;
        return Err(e).context("joining the chat network");
    }
    info!(
        server = %cfg.irc_server,
        channels = cfg.channels.len(),
        endpoints = pool.endpoints().len(),
        "chanlog running"
    );

    let received = signal.recv().await;
    if let Ok(name) = &received {
        info!(signal = name, "shutdown requested");
    }
    shutdown(&controller, chat.as_ref(), &outbox, &pool).await;
    received.map(|_| ()).context("waiting for a shutdown signal")
}

/// Provision the schema. On failure the pool is terminated before returning.
async fn open_journal<K>(pool: Arc<LeasePool<K>>, lease_timeout: Duration) -> anyhow::Result<Journal<K>>
where
    K: Connector,
    K::Connection: JournalConnection,
{
    let journal = Journal::new(pool.clone(), lease_timeout);
    if let Err(e) = journal.ensure_schema().await {
        pool.terminate().await;
        return Err(e).context("provisioning the journal schema");
    }
    Ok(journal)
}

/// Ctrl-C, or SIGTERM from a service manager.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
              res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
              _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
        }
    }
}

async fn shutdown<K: Connector>(
    controller: &ReconnectController,
    chat: &dyn ChatPort,
    outbox: &DeliveryQueue,
    pool: &LeasePool<K>,
) {
    controller.stop().await;
    if let Err(e) = chat.quit(QUIT_REASON).await {
        warn!(error = %e, "quit failed");
    }
    outbox.stop().await;
    pool.terminate().await;
}
