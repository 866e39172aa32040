//! Chat-network abstractions and the outbound delivery path.

pub mod port;
pub mod queue;
pub mod throttled;
pub mod types;
