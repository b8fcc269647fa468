// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use std::net::SocketAddr;
use std::sync::Arc;

/// Picks the backend for one request. Implementations only read the atomic
/// per-backend state, so they are safe to call from any number of request
/// tasks at once.
pub trait LoadBalancer: Send + Sync {
    /// `None` means no backend can take the request.
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        client_addr: Option<SocketAddr>,
    ) -> Option<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
