use std::{fmt, ops::Deref, sync::Arc};

use crate::domain::Endpoint;

/// Identity of one opened connection. Never reused within a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Exclusive, time-bounded grant of one pooled connection.
///
/// Hand it back with `LeasePool::recycle` (or `discard` when it broke). If the
/// lease expires first the pool closes the connection underneath it.
pub struct Lease<C> {
    id: ConnectionId,
    endpoint: Endpoint,
    connection: Arc<C>,
}

impl<C> Lease<C> {
    pub(crate) fn new(id: ConnectionId, endpoint: Endpoint, connection: Arc<C>) -> Self {
        Self {
            id,
            endpoint,
            connection,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub(crate) fn into_parts(self) -> (ConnectionId, Endpoint, Arc<C>) {
        (self.id, self.endpoint, self.connection)
    }
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
