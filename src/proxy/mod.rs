pub mod manager;

pub use manager::{PoolStats, Proxy, ProxyManager, ProxyProbe};
