// src/metrics/collector.rs
use crate::proxy::Backend;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub rejected_requests_total: IntCounter,

    // Backend metrics
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,

    // System metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of forwarded requests"),
            &["status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time until the backend response headers arrived",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let rejected_requests_total = IntCounter::new(
            "lb_rejected_requests_total",
            "Requests rejected because no backend was healthy",
        )?;
        registry.register(Box::new(rejected_requests_total.clone()))?;

        let backend_connections_active = IntGaugeVec::new(
            Opts::new(
                "lb_backend_connections_active",
                "Active backend connections",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_connections_active.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends =
            IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            rejected_requests_total,
            backend_connections_active,
            backend_health_status,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_request(&self, status_code: u16, backend: &str, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[status.as_str(), backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_rejected(&self) {
        self.rejected_requests_total.inc();
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);
    }

    /// Snapshot live registry state into the gauges, right before a scrape.
    pub fn observe_backends(&self, backends: &[Arc<Backend>]) {
        let mut healthy = 0;
        for backend in backends {
            let state = backend.get_metrics();
            if state.healthy {
                healthy += 1;
            }
            self.update_backend_health(&backend.address, state.healthy);
            self.backend_connections_active
                .with_label_values(&[backend.address.as_str()])
                .set(state.active_connections as i64);
        }

        self.healthy_backends.set(healthy);
        self.total_backends.set(backends.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendScheme;

    #[test]
    fn test_observe_backends_exports_state() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        let up = Arc::new(Backend::new(BackendScheme::Http, "10.0.0.1:80").unwrap());
        let down = Arc::new(Backend::new(BackendScheme::Http, "10.0.0.2:80").unwrap());
        down.set_healthy(false);
        let _guard = up.acquire();

        collector.observe_backends(&[up.clone(), down.clone()]);
        collector.record_request(200, "10.0.0.1:80", Duration::from_millis(12));
        collector.record_rejected();

        assert_eq!(collector.healthy_backends.get(), 1);
        assert_eq!(collector.total_backends.get(), 2);
        assert_eq!(
            collector
                .backend_connections_active
                .with_label_values(&["10.0.0.1:80"])
                .get(),
            1
        );

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("lb_requests_total"));
        assert!(text.contains("lb_rejected_requests_total 1"));
        assert!(text.contains("lb_backend_health_status{backend=\"10.0.0.2:80\"} 0"));
    }
}
