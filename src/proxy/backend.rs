// src/proxy/backend.rs
use crate::config::{backend_url, BackendScheme, ConfigError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

#[derive(Debug)]
pub struct Backend {
    /// `host:port`, as configured.
    pub address: String,
    pub url: Url,

    // Runtime state
    healthy: AtomicBool,
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Backend {
    /// Backends start out healthy; the first probe corrects that if needed.
    pub fn new(scheme: BackendScheme, address: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            address: address.to_string(),
            url: backend_url(scheme, address)?,
            healthy: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Stores the new health flag and returns the previous one.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Counts one forwarding attempt as in flight until the guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    fn release(&self) {
        let previous = self.active_connections.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "connection counter underflow on {}", self.address);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> BackendMetrics {
        BackendMetrics {
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// One in-flight forwarding attempt. Dropping it releases the connection slot.
#[derive(Debug)]
#[must_use = "the connection is released as soon as the guard is dropped"]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl ConnectionGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendMetrics {
    pub healthy: bool,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
}
