//! Prometheus metrics for the event pipeline.
//!
//! Covers both edges of the pipeline:
//! - Outbound publication (successes, failures, latency)
//! - Inbound consumption (applied, duplicates, poison messages)
//! - Completion records
//!
//! Recording is always safe: without an installed recorder the `metrics`
//! macros are no-ops, so library code records unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use booking_pipeline_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Expose metrics on port 9090 (must run inside a Tokio runtime)
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use booking_pipeline_core::completion::CompletionStage;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (e.g. by an earlier test) is not an
    /// error; the server then has no handle of its own.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(
                error = %e,
                "Metrics recorder already initialized, skipping re-initialization"
            );
            return Ok(());
        }

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
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

    /// Address the server listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "pipeline_events_published_total",
        "Total number of envelopes accepted by the broker"
    );
    describe_counter!(
        "pipeline_publish_failures_total",
        "Total number of envelopes that could not be published"
    );
    describe_histogram!(
        "pipeline_publish_duration_seconds",
        "Time taken to publish an envelope, retries included"
    );
    describe_counter!(
        "pipeline_events_consumed_total",
        "Total number of envelopes applied to a read model"
    );
    describe_counter!(
        "pipeline_duplicates_skipped_total",
        "Total number of redelivered envelopes skipped by the idempotence guard"
    );
    describe_counter!(
        "pipeline_poison_messages_total",
        "Total number of envelopes rejected as poison"
    );
    describe_counter!(
        "pipeline_completions_recorded_total",
        "Total number of completion records"
    );
}

/// Recorders for every pipeline metric.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record an accepted publication.
    pub fn record_publish(event_type: &str, duration: Duration) {
        counter!("pipeline_events_published_total", "event_type" => event_type.to_string())
            .increment(1);
        histogram!("pipeline_publish_duration_seconds", "event_type" => event_type.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a publication that exhausted its retries or was rejected.
    pub fn record_publish_failure(event_type: &str) {
        counter!("pipeline_publish_failures_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record an envelope applied to a read model.
    pub fn record_consumed(event_type: &str) {
        counter!("pipeline_events_consumed_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record a duplicate delivery skipped by the idempotence guard.
    pub fn record_duplicate(event_type: &str) {
        counter!("pipeline_duplicates_skipped_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record a poison message.
    pub fn record_poison(event_type: &str) {
        counter!("pipeline_poison_messages_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record a new completion record.
    pub fn record_completion(event_type: &str, stage: CompletionStage) {
        counter!(
            "pipeline_completions_recorded_total",
            "event_type" => event_type.to_string(),
            "stage" => stage.as_str()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn recorded_metrics_are_rendered() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        PipelineMetrics::record_publish("UserCreated", Duration::from_millis(5));
        PipelineMetrics::record_consumed("UserCreated");
        PipelineMetrics::record_completion("UserCreated", CompletionStage::Consumed);

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("pipeline_events_published_total"));
            assert!(rendered.contains("pipeline_events_consumed_total"));
            assert!(rendered.contains("pipeline_completions_recorded_total"));
        }
    }

    #[tokio::test]
    async fn starting_twice_keeps_first_recorder() {
        let mut first = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        let mut second = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        first.start().unwrap();
        second.start().unwrap();

        assert!(second.handle().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        PipelineMetrics::record_duplicate("UserCreated");
        PipelineMetrics::record_poison("UserCreated");
        PipelineMetrics::record_publish_failure("UserCreated");
    }
}
