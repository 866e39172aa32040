use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::Endpoint,
    pool::{
        lease::{ConnectionId, Lease},
        port::{Connector, LeaseListener, PoolConnection},
    },
    Error, Result,
};

type Conn<K> = <K as Connector>::Connection;

#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Spacing between maintenance cycles (lease reclaim + endpoint retry).
    pub maintenance_interval: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of the pool, taken under both locks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub free: usize,
    pub leased: usize,
    /// Failed endpoints with their consecutive connect failures.
    pub failed: BTreeMap<Endpoint, u32>,
}

impl PoolStats {
    pub fn healthy(&self) -> usize {
        self.free + self.leased
    }

    pub fn total(&self) -> usize {
        self.free + self.leased + self.failed.len()
    }
}

struct Pooled<C> {
    id: ConnectionId,
    connection: Arc<C>,
}

struct LeaseDetails<C> {
    endpoint: Endpoint,
    connection: Arc<C>,
    expires_at: Instant,
    listener: Option<Arc<dyn LeaseListener<C>>>,
}

struct ActiveState<C> {
    free: HashMap<Endpoint, Pooled<C>>,
    leased: HashMap<ConnectionId, LeaseDetails<C>>,
    terminated: bool,
}

impl<C> ActiveState<C> {
    fn new() -> Self {
        Self {
            free: HashMap::new(),
            leased: HashMap::new(),
            terminated: false,
        }
    }
}

struct PoolInner<K: Connector> {
    connector: K,
    cfg: PoolConfig,
    // Lock order: `failed` before `active`.
    failed: Mutex<HashMap<Endpoint, u32>>,
    active: Mutex<ActiveState<Conn<K>>>,
    free_changed: Notify,
    next_id: AtomicU64,
}

struct MaintenanceTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pool of exclusive, expiring leases over one connection per store endpoint.
pub struct LeasePool<K: Connector> {
    inner: Arc<PoolInner<K>>,
    endpoints: Vec<Endpoint>,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl<K: Connector> LeasePool<K> {
    /// Connect to every endpoint once and start the maintenance task.
    ///
    /// Fails with `Error::PoolExhausted` when no endpoint is reachable.
    pub async fn connect(connector: K, endpoints: Vec<Endpoint>, cfg: PoolConfig) -> Result<Self> {
        let mut unique: Vec<Endpoint> = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            if !unique.contains(&ep) {
                unique.push(ep);
            }
        }

        let inner = Arc::new(PoolInner {
            connector,
            cfg,
            failed: Mutex::new(unique.iter().map(|ep| (ep.clone(), 0)).collect()),
            active: Mutex::new(ActiveState::new()),
            free_changed: Notify::new(),
            next_id: AtomicU64::new(1),
        });

        inner.retry_failed().await;

        let healthy = inner.active.lock().await.free.len();
        if healthy == 0 {
            return Err(Error::PoolExhausted {
                endpoints: unique
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        info!(
            healthy,
            configured = unique.len(),
            "store connection pool ready"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(maintenance_loop(inner.clone(), cancel.clone()));

        Ok(Self {
            inner,
            endpoints: unique,
            maintenance: Mutex::new(Some(MaintenanceTask { cancel, handle })),
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Wait for a free connection and lease it until `now + lease_timeout`.
    ///
    /// Any free connection may be handed out; waiters are not served in order.
    ///
    /// # Panics
    ///
    /// Panics when `lease_timeout` is zero.
    pub async fn lease(
        &self,
        lease_timeout: Duration,
        listener: Option<Arc<dyn LeaseListener<Conn<K>>>>,
    ) -> Result<Lease<Conn<K>>> {
        assert!(!lease_timeout.is_zero(), "lease timeout must be positive");

        loop {
            // Register interest before checking, so a recycle between the check
            // and the await is not missed.
            let notified = self.inner.free_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut active = self.inner.active.lock().await;
                if active.terminated {
                    return Err(Error::PoolTerminated);
                }

                let endpoint = active.free.keys().next().cloned();
                if let Some(endpoint) = endpoint {
                    if let Some(pooled) = active.free.remove(&endpoint) {
                        active.leased.insert(
                            pooled.id,
                            LeaseDetails {
                                endpoint: endpoint.clone(),
                                connection: pooled.connection.clone(),
                                expires_at: Instant::now() + lease_timeout,
                                listener,
                            },
                        );
                        return Ok(Lease::new(pooled.id, endpoint, pooled.connection));
                    }
                }
            }

            notified.await;
        }
    }

    /// Return a leased connection to the free set.
    ///
    /// No-op when the lease was already reclaimed. A connection that reports
    /// itself closed is retired instead and its endpoint queued for reconnect.
    pub async fn recycle(&self, lease: Lease<Conn<K>>) {
        if !lease.is_open() {
            self.discard(lease).await;
            return;
        }

        let (id, endpoint, connection) = lease.into_parts();
        {
            let mut active = self.inner.active.lock().await;
            if active.leased.remove(&id).is_none() {
                debug!(endpoint = %endpoint, "recycle of reclaimed lease ignored");
                return;
            }
            active.free.insert(endpoint, Pooled { id, connection });
        }
        self.inner.free_changed.notify_waiters();
    }

    /// Retire a leased connection the borrower found broken.
    pub async fn discard(&self, lease: Lease<Conn<K>>) {
        let (id, endpoint, _) = lease.into_parts();
        let retired = {
            let mut failed = self.inner.failed.lock().await;
            let mut active = self.inner.active.lock().await;
            let Some(details) = active.leased.remove(&id) else {
                debug!(endpoint = %endpoint, "discard of reclaimed lease ignored");
                return;
            };
            failed.insert(details.endpoint.clone(), 0);
            details
        };

        warn!(endpoint = %retired.endpoint, "store connection discarded; will reconnect");
        retired.connection.close().await;
    }

    /// Push the lease expiry out to `now + lease_timeout`. Never shortens it.
    pub async fn renew(&self, lease: &Lease<Conn<K>>, lease_timeout: Duration) {
        let mut active = self.inner.active.lock().await;
        if let Some(details) = active.leased.get_mut(&lease.id()) {
            let candidate = Instant::now() + lease_timeout;
            if candidate > details.expires_at {
                details.expires_at = candidate;
            }
        }
    }

    /// Run one maintenance cycle now.
    pub async fn maintain(&self) {
        self.inner.maintain().await;
    }

    pub async fn stats(&self) -> PoolStats {
        let failed = self.inner.failed.lock().await;
        let active = self.inner.active.lock().await;
        PoolStats {
            free: active.free.len(),
            leased: active.leased.len(),
            failed: failed.iter().map(|(ep, n)| (ep.clone(), *n)).collect(),
        }
    }

    /// Stop maintenance, then close every tracked connection once.
    ///
    /// Pending and later `lease()` calls fail with `Error::PoolTerminated`.
    pub async fn terminate(&self) {
        let task = self.maintenance.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "pool maintenance task ended abnormally");
            }
        }

        let (idle, borrowed) = {
            let mut failed = self.inner.failed.lock().await;
            let mut active = self.inner.active.lock().await;
            active.terminated = true;
            failed.clear();

            let idle: Vec<Arc<Conn<K>>> = active.free.drain().map(|(_, p)| p.connection).collect();
            let borrowed: Vec<Arc<Conn<K>>> =
                active.leased.drain().map(|(_, d)| d.connection).collect();
            (idle, borrowed)
        };
        self.inner.free_changed.notify_waiters();

        for connection in &idle {
            connection.close().await;
        }
        // A borrower may still be inside an operation on these.
        for connection in &borrowed {
            close_detached(connection.clone());
        }
        let connections = idle.len() + borrowed.len();
        info!(closed = connections, "store connection pool terminated");
    }
}

impl<K: Connector> Drop for LeasePool<K> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.maintenance.try_lock() {
            if let Some(task) = guard.take() {
                task.cancel.cancel();
            }
        }
    }
}

impl<K: Connector> PoolInner<K> {
    async fn maintain(&self) {
        for expired in self.reclaim_expired().await {
            warn!(
                endpoint = %expired.endpoint,
                "lease expired; connection closed and endpoint queued for reconnect"
            );
            // The borrower may be stuck inside the connection; never wait on it here.
            close_detached(expired.connection.clone());
            if let Some(listener) = &expired.listener {
                listener.lease_timed_out(&expired.endpoint, &expired.connection);
            }
        }

        self.retry_failed().await;
    }

    /// Move every expired lease's endpoint to the failed set.
    ///
    /// A timed-out connection is never returned to the free set.
    async fn reclaim_expired(&self) -> Vec<LeaseDetails<Conn<K>>> {
        let now = Instant::now();
        let mut failed = self.failed.lock().await;
        let mut active = self.active.lock().await;

        let expired: Vec<ConnectionId> = active
            .leased
            .iter()
            .filter(|(_, d)| d.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(details) = active.leased.remove(&id) {
                failed.insert(details.endpoint.clone(), 0);
                out.push(details);
            }
        }
        out
    }

    /// Try every failed endpoint once; one bad endpoint never blocks the others.
    ///
    /// Connects run without holding either lock.
    async fn retry_failed(&self) {
        let mut endpoints: Vec<Endpoint> = self.failed.lock().await.keys().cloned().collect();
        if endpoints.is_empty() {
            return;
        }
        endpoints.sort();

        for endpoint in endpoints {
            let opened = self.open(&endpoint).await;

            let mut failed = self.failed.lock().await;
            let mut active = self.active.lock().await;
            let wanted = !active.terminated && failed.contains_key(&endpoint);

            match opened {
                Ok(connection) if wanted => {
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    active.free.insert(
                        endpoint.clone(),
                        Pooled {
                            id,
                            connection: Arc::new(connection),
                        },
                    );
                    let previous_failures = failed.remove(&endpoint).unwrap_or_default();
                    drop(active);
                    drop(failed);
                    info!(endpoint = %endpoint, previous_failures, "store endpoint connected");
                    self.free_changed.notify_waiters();
                }
                Ok(connection) => {
                    // Terminated, or another cycle already reconnected it.
                    drop(active);
                    drop(failed);
                    debug!(endpoint = %endpoint, "surplus store connection closed");
                    connection.close().await;
                }
                Err(e) => {
                    let Some(count) = failed.get_mut(&endpoint) else {
                        continue;
                    };
                    *count = count.saturating_add(1);
                    error!(
                        endpoint = %endpoint,
                        consecutive_failures = *count,
                        error = %e,
                        "failed connecting to store endpoint"
                    );
                }
            }
        }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Conn<K>> {
        timeout(self.cfg.connect_timeout, self.connector.connect(endpoint))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {endpoint}")))?
    }
}

fn close_detached<C: PoolConnection>(connection: Arc<C>) {
    tokio::spawn(async move { connection.close().await });
}

async fn maintenance_loop<K: Connector>(inner: Arc<PoolInner<K>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = sleep(inner.cfg.maintenance_interval) => inner.maintain().await,
        }
    }
    debug!("pool maintenance stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;

    struct FakeConnection {
        endpoint: Endpoint,
        open: AtomicBool,
        closes: Arc<AtomicUsize>,
        close_gate: Option<Arc<Mutex<()>>>,
    }

    #[async_trait]
    impl PoolConnection for FakeConnection {
        async fn close(&self) {
            if let Some(gate) = &self.close_gate {
                let _wait = gate.lock().await;
            }
            self.open.store(false, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        reachable: Arc<StdMutex<HashSet<Endpoint>>>,
        closes: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        connect_delay: Arc<StdMutex<HashMap<Endpoint, Duration>>>,
        close_gate: Arc<StdMutex<Option<Arc<Mutex<()>>>>>,
    }

    impl FakeConnector {
        fn with_reachable(endpoints: &[Endpoint]) -> Self {
            let c = Self::default();
            for ep in endpoints {
                c.set_reachable(ep, true);
            }
            c
        }

        fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
            let mut set = self.reachable.lock().unwrap();
            if reachable {
                set.insert(endpoint.clone());
            } else {
                set.remove(endpoint);
            }
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn delay_connect(&self, endpoint: &Endpoint, delay: Duration) {
            self.connect_delay
                .lock()
                .unwrap()
                .insert(endpoint.clone(), delay);
        }

        /// Connections opened from now on block in `close()` while `gate` is held.
        fn gate_closes(&self, gate: Option<Arc<Mutex<()>>>) {
            *self.close_gate.lock().unwrap() = gate;
        }

        async fn wait_for_closes(&self, n: usize) {
            timeout(Duration::from_secs(2), async {
                while self.closes() < n {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self, endpoint: &Endpoint) -> Result<FakeConnection> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = self.connect_delay.lock().unwrap().get(endpoint).copied();
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if !self.reachable.lock().unwrap().contains(endpoint) {
                return Err(Error::StoreConnection(format!("{endpoint} refused")));
            }
            Ok(FakeConnection {
                endpoint: endpoint.clone(),
                open: AtomicBool::new(true),
                closes: self.closes.clone(),
                close_gate: self.close_gate.lock().unwrap().clone(),
            })
        }
    }

    #[derive(Default)]
    struct CountingListener {
        expired: StdMutex<Vec<Endpoint>>,
    }

    impl LeaseListener<FakeConnection> for CountingListener {
        fn lease_timed_out(&self, endpoint: &Endpoint, connection: &Arc<FakeConnection>) {
            assert_eq!(&connection.endpoint, endpoint);
            self.expired.lock().unwrap().push(endpoint.clone());
        }
    }

    fn ep(n: u16) -> Endpoint {
        Endpoint::new("store", 9000 + n)
    }

    fn slow_maintenance() -> PoolConfig {
        PoolConfig {
            maintenance_interval: Duration::from_secs(3600),
            connect_timeout: Duration::from_millis(200),
        }
    }

    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn construction_fails_when_nothing_is_reachable() {
        let connector = FakeConnector::default();
        let res = LeasePool::connect(connector, vec![ep(1), ep(2)], slow_maintenance()).await;
        match res {
            Err(Error::PoolExhausted { endpoints }) => {
                assert!(endpoints.contains("store/9001"));
                assert!(endpoints.contains("store/9002"));
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("pool should not start without a reachable endpoint"),
        }
    }

    #[tokio::test]
    async fn lease_and_recycle_keep_every_endpoint_accounted_for() {
        let connector = FakeConnector::with_reachable(&[ep(1), ep(2)]);
        let pool = LeasePool::connect(connector, vec![ep(1), ep(2), ep(3)], slow_maintenance())
            .await
            .unwrap();

        let stats = pool.stats().await;
        assert_eq!(stats.free, 2);
        assert_eq!(stats.failed.get(&ep(3)), Some(&1));
        assert_eq!(stats.total(), 3);

        let a = pool.lease(LONG, None).await.unwrap();
        let stats = pool.stats().await;
        assert_eq!((stats.free, stats.leased), (1, 1));
        assert_eq!(stats.total(), 3);

        let b = pool.lease(LONG, None).await.unwrap();
        assert_ne!(a.endpoint(), b.endpoint());
        let stats = pool.stats().await;
        assert_eq!((stats.free, stats.leased), (0, 2));

        pool.recycle(a).await;
        pool.recycle(b).await;
        let stats = pool.stats().await;
        assert_eq!((stats.free, stats.leased), (2, 0));
        assert_eq!(stats.healthy(), 2);
        assert_eq!(stats.total(), 3);

        pool.terminate().await;
    }

    #[tokio::test]
    async fn second_borrower_waits_for_recycle_on_single_endpoint() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let pool = Arc::new(
            LeasePool::connect(connector, vec![ep(1)], slow_maintenance())
                .await
                .unwrap(),
        );

        let first = pool.lease(LONG, None).await.unwrap();

        let p = pool.clone();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let lease = p.lease(LONG, None).await.unwrap();
            (started.elapsed(), lease)
        });

        sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        pool.recycle(first).await;
        let (waited, second) = timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(second.endpoint(), &ep(1));

        pool.recycle(second).await;
        pool.terminate().await;
    }

    #[tokio::test]
    async fn expired_lease_goes_to_failed_set_and_notifies_listener() {
        let connector = FakeConnector::with_reachable(&[ep(1), ep(2)]);
        let pool = LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], slow_maintenance())
            .await
            .unwrap();
        let listener = Arc::new(CountingListener::default());

        let lease = pool
            .lease(Duration::from_millis(20), Some(listener.clone()))
            .await
            .unwrap();
        let endpoint = lease.endpoint().clone();
        connector.set_reachable(&endpoint, false);

        sleep(Duration::from_millis(50)).await;
        pool.maintain().await;

        let stats = pool.stats().await;
        assert!(stats.failed.contains_key(&endpoint));
        assert_eq!((stats.free, stats.leased), (1, 0));
        assert_eq!(stats.total(), 2);
        assert_eq!(listener.expired.lock().unwrap().as_slice(), &[endpoint]);
        connector.wait_for_closes(1).await;
        assert_eq!(connector.closes(), 1);
        assert!(!lease.is_open());

        // The late borrower's recycle loses the race and changes nothing.
        pool.recycle(lease).await;
        assert_eq!(pool.stats().await, stats);

        pool.terminate().await;
    }

    #[tokio::test]
    async fn flapping_endpoint_rejoins_within_one_interval() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let cfg = PoolConfig {
            maintenance_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
        };
        let pool = LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], cfg)
            .await
            .unwrap();
        assert_eq!(pool.stats().await.failed.get(&ep(2)), Some(&1));

        connector.set_reachable(&ep(2), true);
        let rejoined = timeout(Duration::from_millis(150), async {
            loop {
                if pool.stats().await.free == 2 {
                    break;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(rejoined.is_ok());
        assert!(pool.stats().await.failed.is_empty());

        pool.terminate().await;
    }

    #[tokio::test]
    async fn renew_extends_but_never_shortens() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let pool = LeasePool::connect(connector, vec![ep(1)], slow_maintenance())
            .await
            .unwrap();

        let lease = pool.lease(Duration::from_millis(30), None).await.unwrap();
        pool.renew(&lease, LONG).await;
        sleep(Duration::from_millis(60)).await;
        pool.maintain().await;
        assert_eq!(pool.stats().await.leased, 1);

        pool.renew(&lease, Duration::from_millis(1)).await;
        sleep(Duration::from_millis(10)).await;
        pool.maintain().await;
        assert_eq!(pool.stats().await.leased, 1);

        pool.recycle(lease).await;
        pool.terminate().await;
    }

    #[tokio::test]
    async fn discarded_connection_is_closed_and_retried() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let pool = LeasePool::connect(connector.clone(), vec![ep(1)], slow_maintenance())
            .await
            .unwrap();

        let lease = pool.lease(LONG, None).await.unwrap();
        pool.discard(lease).await;
        assert_eq!(connector.closes(), 1);
        assert_eq!(pool.stats().await.failed.get(&ep(1)), Some(&0));

        pool.maintain().await;
        let stats = pool.stats().await;
        assert_eq!(stats.free, 1);
        assert!(stats.failed.is_empty());

        pool.terminate().await;
    }

    #[tokio::test]
    async fn terminate_closes_everything_once_and_releases_waiters() {
        let connector = FakeConnector::with_reachable(&[ep(1), ep(2)]);
        let pool = Arc::new(
            LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], slow_maintenance())
                .await
                .unwrap(),
        );

        let a = pool.lease(LONG, None).await.unwrap();
        let b = pool.lease(LONG, None).await.unwrap();
        let p = pool.clone();
        let waiter = tokio::spawn(async move { p.lease(LONG, None).await });
        sleep(Duration::from_millis(20)).await;

        pool.terminate().await;
        assert!(matches!(
            timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap(),
            Err(Error::PoolTerminated)
        ));
        connector.wait_for_closes(2).await;
        assert_eq!(connector.closes(), 2);

        pool.recycle(a).await;
        pool.recycle(b).await;
        pool.terminate().await;
        assert_eq!(connector.closes(), 2);
        assert_eq!(pool.stats().await, PoolStats::default());
    }

    #[tokio::test]
    async fn maintenance_keeps_running_while_an_expired_connection_hangs_in_close() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let gate = Arc::new(Mutex::new(()));
        connector.gate_closes(Some(gate.clone()));
        let cfg = PoolConfig {
            maintenance_interval: Duration::from_millis(30),
            connect_timeout: Duration::from_millis(200),
        };
        let pool = LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], cfg)
            .await
            .unwrap();
        connector.gate_closes(None);

        // The borrower is stuck inside the connection, so closing it cannot finish.
        let stuck = gate.lock().await;
        let lease = pool.lease(Duration::from_millis(20), None).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.stats().await.leased, 0);

        let before = connector.attempts();
        sleep(Duration::from_millis(150)).await;
        assert!(connector.attempts() > before, "failed endpoint no longer retried");
        assert_eq!(pool.stats().await.free, 1);

        assert!(timeout(Duration::from_secs(1), pool.terminate()).await.is_ok());

        drop(stuck);
        connector.wait_for_closes(2).await;
        assert!(!lease.is_open());
    }

    #[tokio::test]
    async fn discard_does_not_wait_behind_a_slow_reconnect() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let cfg = PoolConfig {
            maintenance_interval: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(2),
        };
        let pool = Arc::new(
            LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], cfg)
                .await
                .unwrap(),
        );
        connector.delay_connect(&ep(2), Duration::from_millis(500));

        let lease = pool.lease(LONG, None).await.unwrap();
        let p = pool.clone();
        let cycle = tokio::spawn(async move { p.maintain().await });
        sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        pool.discard(lease).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        let stats = timeout(Duration::from_millis(200), pool.stats())
            .await
            .unwrap();
        assert_eq!(stats.failed.get(&ep(1)), Some(&0));

        timeout(Duration::from_secs(2), cycle).await.unwrap().unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.failed.get(&ep(1)), Some(&0));
        assert_eq!(stats.failed.get(&ep(2)), Some(&2));

        pool.terminate().await;
    }

    #[tokio::test]
    async fn connection_opened_after_terminate_is_closed_not_pooled() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let pool = Arc::new(
            LeasePool::connect(connector.clone(), vec![ep(1), ep(2)], slow_maintenance())
                .await
                .unwrap(),
        );
        connector.delay_connect(&ep(2), Duration::from_millis(100));
        connector.set_reachable(&ep(2), true);

        let p = pool.clone();
        let cycle = tokio::spawn(async move { p.maintain().await });
        sleep(Duration::from_millis(20)).await;
        pool.terminate().await;
        assert_eq!(connector.closes(), 1);

        timeout(Duration::from_secs(1), cycle).await.unwrap().unwrap();
        assert_eq!(connector.closes(), 2);
        assert_eq!(pool.stats().await, PoolStats::default());
    }

    #[tokio::test]
    #[should_panic(expected = "lease timeout must be positive")]
    async fn zero_lease_timeout_is_a_programming_error() {
        let connector = FakeConnector::with_reachable(&[ep(1)]);
        let pool = LeasePool::connect(connector, vec![ep(1)], slow_maintenance())
            .await
            .unwrap();
        let _ = pool.lease(Duration::ZERO, None).await;
    }
}
