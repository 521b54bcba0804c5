use anyhow::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::info;
use std::sync::Arc;
use tokio::sync::OnceCell;


// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the process-wide `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE.get_or_init(|| async {
        info!("Initializing Metrics ...");
        Metrics::new()}
    ).await
}


#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Refresh metrics
    pub refresh_total: IntCounterVec,
    pub refresh_failures: IntCounterVec,
    pub refresh_joins: IntCounterVec,
    pub refresh_duration: HistogramVec,

    // Cache metrics
    pub credential_expiry_unix: IntGaugeVec,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("credentialcache".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            refresh_total: IntCounterVec::new(Opts::new("refresh_total", "Refresh operations started"),&["credential", "kind"],).unwrap(),
            refresh_failures: IntCounterVec::new(Opts::new("refresh_failures_total", "Refresh failures by reason"),&["credential", "kind", "reason"],).unwrap(),
            refresh_joins: IntCounterVec::new(Opts::new("refresh_joins_total", "Callers that joined an in-flight refresh"),&["credential", "kind"],).unwrap(),
            refresh_duration: HistogramVec::new(HistogramOpts::new("refresh_duration_seconds", "Refresh duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),&["credential"],).unwrap(),

            credential_expiry_unix: IntGaugeVec::new(Opts::new("credential_expiry_unix_seconds", "Instant the cached credential turns stale"),&["credential", "kind"],).unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.refresh_total.clone())).unwrap();
        reg.register(Box::new(metrics.refresh_failures.clone())).unwrap();
        reg.register(Box::new(metrics.refresh_joins.clone())).unwrap();
        reg.register(Box::new(metrics.refresh_duration.clone())).unwrap();
        reg.register(Box::new(metrics.credential_expiry_unix.clone())).unwrap();

        metrics
    }

    /// Render every registered family in the prometheus text format.
    pub fn gather_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
