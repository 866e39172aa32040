use std::sync::Arc;

use async_trait::async_trait;

use crate::{domain::Endpoint, Result};

/// Lifecycle surface of a pooled store connection.
///
/// The pool never looks at the query surface; it only opens, health-checks and
/// closes connections.
#[async_trait]
pub trait PoolConnection: Send + Sync + 'static {
    /// Release the underlying resources. The pool calls this exactly once.
    async fn close(&self);

    /// `false` once the connection is known to be unusable.
    fn is_open(&self) -> bool;
}

/// Opens connections to store endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: PoolConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Connection>;
}

/// Notified when a lease is reclaimed because its borrower let it expire.
///
/// Called from the maintenance task with no pool lock held.
pub trait LeaseListener<C>: Send + Sync {
    fn lease_timed_out(&self, endpoint: &Endpoint, connection: &Arc<C>);
}
