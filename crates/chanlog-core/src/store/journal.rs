use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::time::timeout;
use tracing::warn;

use crate::{
    domain::Endpoint,
    pool::{Connector, Lease, LeaseListener, LeasePool},
    store::{JournalConnection, JournalEntry, JournalStore},
    Error, Result,
};

/// Logs leases the journal failed to hand back in time.
pub struct ExpiredLeaseLogger;

impl<C> LeaseListener<C> for ExpiredLeaseLogger {
    fn lease_timed_out(&self, endpoint: &Endpoint, _connection: &Arc<C>) {
        warn!(endpoint = %endpoint, "journal operation outlived its store lease");
    }
}

/// `JournalStore` over the lease pool: one lease per operation.
pub struct Journal<K: Connector> {
    pool: Arc<LeasePool<K>>,
    lease_timeout: Duration,
    listener: Arc<dyn LeaseListener<K::Connection>>,
}

impl<K> Journal<K>
where
    K: Connector,
    K::Connection: JournalConnection,
{
    pub fn new(pool: Arc<LeasePool<K>>, lease_timeout: Duration) -> Self {
        Self {
            pool,
            lease_timeout,
            listener: Arc::new(ExpiredLeaseLogger),
        }
    }

    pub fn pool(&self) -> &Arc<LeasePool<K>> {
        &self.pool
    }

    /// One-time idempotent schema provisioning.
    pub async fn ensure_schema(&self) -> Result<()> {
        let lease = self.checkout().await?;
        let res = lease.ensure_schema().await;
        self.checkin(lease, res).await
    }

    /// Wait at most `lease_timeout` for a connection.
    async fn checkout(&self) -> Result<Lease<K::Connection>> {
        timeout(
            self.lease_timeout,
            self.pool.lease(self.lease_timeout, Some(self.listener.clone())),
        )
        .await
        .map_err(|_| Error::Timeout("waiting for a store connection".to_string()))?
    }

    /// Hand the lease back; connection faults retire it instead.
    async fn checkin<T>(&self, lease: Lease<K::Connection>, res: Result<T>) -> Result<T> {
        match &res {
            Err(e) if e.is_connection_fault() => self.pool.discard(lease).await,
            _ => self.pool.recycle(lease).await,
        }
        res
    }
}

#[async_trait]
impl<K> JournalStore for Journal<K>
where
    K: Connector,
    K::Connection: JournalConnection,
{
    async fn record(&self, entry: JournalEntry) -> Result<()> {
        let lease = self.checkout().await?;
        let res = lease.append(&entry).await;
        self.checkin(lease, res).await
    }

    async fn last_seen(&self, channel: &str, sender: &str) -> Result<Option<JournalEntry>> {
        let lease = self.checkout().await?;
        let res = lease.last_seen(channel, sender).await;
        self.checkin(lease, res).await
    }

    async fn messages_on(&self, channel: &str, day: NaiveDate) -> Result<Vec<JournalEntry>> {
        let lease = self.checkout().await?;
        let res = lease.messages_on(channel, day).await;
        self.checkin(lease, res).await
    }

    async fn topic_entries(&self, channel: &str, word: &str) -> Result<Vec<JournalEntry>> {
        let lease = self.checkout().await?;
        let res = lease.topic_entries(channel, word).await;
        self.checkin(lease, res).await
    }
}
