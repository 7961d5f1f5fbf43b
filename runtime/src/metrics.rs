//! Prometheus metrics for request dispatch.
//!
//! The runtime records through the `metrics` facade; without an installed
//! recorder every call is a no-op. [`MetricsServer`] installs the Prometheus
//! recorder and serves the scrape endpoint over HTTP.
//!
//! # Metrics
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `dispatch_requests_submitted_total` | counter | |
//! | `dispatch_requests_coalesced_total` | counter | |
//! | `dispatch_requests_completed_total` | counter | `state` |
//! | `dispatch_request_duration_seconds` | histogram | |
//! | `dispatch_binding_timeouts_total` | counter | |
//!
//! # Example
//!
//! ```rust,no_run
//! use dispatch_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Requests handed to the executor.
pub const REQUESTS_SUBMITTED: &str = "dispatch_requests_submitted_total";
/// Submissions that joined an in-flight request.
pub const REQUESTS_COALESCED: &str = "dispatch_requests_coalesced_total";
/// Attempts that reached a terminal state.
pub const REQUESTS_COMPLETED: &str = "dispatch_requests_completed_total";
/// Time from `Running` to terminal.
pub const REQUEST_DURATION: &str = "dispatch_request_duration_seconds";
/// Queued submissions that failed with a binding error.
pub const BINDING_TIMEOUTS: &str = "dispatch_binding_timeouts_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus its HTTP scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to serve the scrape endpoint on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions, install the Prometheus recorder and
    /// start serving it on the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built (including
    /// when the address cannot be bound) or installed. An already installed
    /// recorder is tolerated (tests install one per process); nothing is
    /// served in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .and_then(PrometheusBuilder::build)
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                register_metrics();
                let addr = self.addr;
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics endpoint stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(REQUESTS_SUBMITTED, "Total number of requests handed to the executor");
    describe_counter!(
        REQUESTS_COALESCED,
        "Total number of submissions that joined an in-flight request"
    );
    describe_counter!(
        REQUESTS_COMPLETED,
        "Total number of request attempts that reached a terminal state"
    );
    describe_histogram!(
        REQUEST_DURATION,
        "Time from transport start to terminal state in seconds"
    );
    describe_counter!(
        BINDING_TIMEOUTS,
        "Total number of queued submissions that failed because no executor was bound"
    );
}
