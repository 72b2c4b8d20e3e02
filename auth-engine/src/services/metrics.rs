//! Prometheus export of the engine's security counters.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub const LOGIN_FAILURES_TOTAL: &str = "auth_login_failures_total";
pub const LOCKOUTS_TOTAL: &str = "auth_lockouts_total";
pub const REFRESH_REUSE_TOTAL: &str = "auth_refresh_reuse_total";
pub const REVOCATIONS_SWEPT_TOTAL: &str = "auth_revocations_swept_total";

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is an error.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics recorder already initialized"))
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}
