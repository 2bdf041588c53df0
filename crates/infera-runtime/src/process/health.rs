//! HTTP health checks for inference servers.

use std::time::Duration;

use tracing::debug;

/// Probe `http://{host}:{port}/health` once.
///
/// Returns `true` only for a 2xx response within `timeout`. Never errors:
/// connection failures, timeouts and non-success statuses all map to `false`.
pub async fn check_http_health(host: &str, port: u16, timeout: Duration) -> bool {
    let url = format!("http://{host}:{port}/health");
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "Failed to build health-check client");
            return false;
        }
    };

    match client.get(&url).send().await {
        Ok(response) => {
            let healthy = response.status().is_success();
            debug!(%url, status = %response.status(), healthy, "Health check response");
            healthy
        }
        Err(e) => {
            debug!(%url, error = %e, "Health check failed");
            false
        }
    }
}
