//! Per-entity control loop (§4.2 "Pool Manager").

mod balancer;
mod manager;
mod queue;

pub use manager::{PoolManager, PoolManagerConfig};
