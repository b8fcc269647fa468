// src/proxy/pool.rs
use super::backend::Backend;
use crate::config::{BackendScheme, ConfigError};
use std::sync::Arc;

/// Fixed, ordered set of backends. Built once at startup and never resized;
/// registry order is the tie-break order for selection.
#[derive(Debug, Clone)]
pub struct BackendPool {
    backends: Arc<[Arc<Backend>]>,
    scheme: BackendScheme,
}

impl BackendPool {
    pub fn new<S: AsRef<str>>(scheme: BackendScheme, addresses: &[S]) -> Result<Self, ConfigError> {
        if addresses.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let backends = addresses
            .iter()
            .map(|address| Backend::new(scheme, address.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "Backend pool created with {} backends over {}",
            backends.len(),
            scheme
        );

        Ok(Self {
            backends: backends.into(),
            scheme,
        })
    }

    pub fn scheme(&self) -> BackendScheme {
        self.scheme
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn get_backend(&self, address: &str) -> Option<Arc<Backend>> {
        self.backends.iter().find(|b| b.address == address).cloned()
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
