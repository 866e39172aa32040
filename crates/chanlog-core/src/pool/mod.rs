//! Leasing pool of store connections.
//!
//! One connection per configured endpoint. Borrowers take exclusive, time-bounded
//! leases; a background maintenance task reclaims expired leases and reconnects
//! failed endpoints.

pub mod lease;
pub mod lease_pool;
pub mod port;

pub use lease::{ConnectionId, Lease};
pub use lease_pool::{LeasePool, PoolConfig, PoolStats};
pub use port::{Connector, LeaseListener, PoolConnection};
