// src/proxy/mod.rs
mod backend;
mod forwarder;
mod pool;
mod proxy;

pub use backend::{Backend, BackendMetrics, ConnectionGuard};
pub use forwarder::{ForwardError, Forwarder, HyperForwarder};
pub use pool::BackendPool;
pub use proxy::{Proxy, ProxyError, LB_FROM_HEADER};
