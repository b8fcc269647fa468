// src/load_balancer/least_connections.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::Backend;
use std::net::SocketAddr;
use std::sync::Arc;

/// Healthy backend with the fewest in-flight requests. Ties go to the backend
/// that comes first in registry order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastConnectionsBalancer;

impl LeastConnectionsBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _client_addr: Option<SocketAddr>,
    ) -> Option<Arc<Backend>> {
        let mut best: Option<&Arc<Backend>> = None;
        let mut min_connections = usize::MAX;

        for backend in backends {
            if !backend.is_healthy() {
                continue;
            }
            // Strict `<` keeps the earliest backend among equals.
            let connections = backend.active_connections();
            if connections < min_connections {
                min_connections = connections;
                best = Some(backend);
            }
        }

        best.cloned()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
