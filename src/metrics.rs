//! Engine counters, optionally exposed to Prometheus.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::filter::FilterCategory;

pub const DECISIONS_TOTAL: &str = "netsieve_decisions_total";
pub const JOINT_CACHE_REJECTED_TOTAL: &str = "netsieve_joint_cache_rejected_total";
pub const MODIFY_FAILURES_TOTAL: &str = "netsieve_modify_failures_total";

/// Install the Prometheus recorder and its scrape listener on
/// `config.listen`. Without a recorder the counters below are discarded.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if config.enabled {
        PrometheusBuilder::new()
            .with_http_listener(config.listen)
            .install()
            .map_err(|err| Error::Metrics(err.to_string()))?;
        tracing::info!(listen = %config.listen, "metrics exporter installed");
    }
    Ok(())
}

pub(crate) fn record_decision(kind: &'static str) {
    counter!(DECISIONS_TOTAL, "decision" => kind).increment(1);
}

pub(crate) fn record_joint_rejected(category: FilterCategory) {
    counter!(JOINT_CACHE_REJECTED_TOTAL, "category" => category.name()).increment(1);
}

pub(crate) fn record_modify_failure() {
    counter!(MODIFY_FAILURES_TOTAL).increment(1);
}
