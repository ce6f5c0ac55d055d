//! Prometheus metrics for the consistency protocol.
//!
//! Metrics are recorded through the `metrics` facade wherever the event
//! happens (the core crate records version checks and restore withholds
//! itself). This module describes them and exposes them over HTTP:
//!
//! | metric | type | labels |
//! |---|---|---|
//! | `eventloom_version_check_total` | counter | `outcome` |
//! | `eventloom_restore_ahead_of_online_total` | counter | |
//! | `eventloom_transaction_released_total` | counter | `processor` |
//! | `eventloom_transaction_release_duration_seconds` | histogram | |
//! | `eventloom_transaction_buffer_stale_events` | gauge | |
//! | `eventloom_transaction_buffer_head_offset` | gauge | `processor`, `topic`, `partition` |
//! | `eventloom_transaction_buffer_head_age_seconds` | gauge | `processor` |
//! | `eventloom_command_retries_total` | counter | |
//! | `eventloom_records_processed_total` | counter | `pipeline`, `disposition` |
//!
//! # Example
//!
//! ```rust,no_run
//! use eventloom_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves `/metrics` on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP exporter on the current Tokio
    /// runtime.
    ///
    /// If a recorder is already installed (e.g. by another test) this logs a
    /// warning and leaves [`MetricsServer::handle`] empty.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            // ExporterError implements neither Debug nor Display
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
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
        "eventloom_version_check_total",
        "Version checks between snapshots and incoming events, by outcome"
    );
    describe_counter!(
        "eventloom_restore_ahead_of_online_total",
        "Restore records withheld because the online pipeline had not processed them yet"
    );
    describe_counter!(
        "eventloom_transaction_released_total",
        "Business transactions released from the buffer"
    );
    describe_histogram!(
        "eventloom_transaction_release_duration_seconds",
        "Time taken to apply and remove a released business transaction"
    );
    describe_gauge!(
        "eventloom_transaction_buffer_stale_events",
        "Buffered events older than the staleness threshold"
    );
    describe_gauge!(
        "eventloom_transaction_buffer_head_offset",
        "Offset of the oldest buffered event of a processor"
    );
    describe_gauge!(
        "eventloom_transaction_buffer_head_age_seconds",
        "Age of the oldest buffered event of a processor, 0 when nothing is buffered"
    );
    describe_counter!(
        "eventloom_command_retries_total",
        "Commands rerun after an optimistic conflict"
    );
    describe_counter!(
        "eventloom_records_processed_total",
        "Records handled by a pipeline, by disposition"
    );
}

/// Business transaction buffer metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record a released transaction.
    pub fn record_release(processor: &str, duration: Duration) {
        counter!("eventloom_transaction_released_total", "processor" => processor.to_string())
            .increment(1);
        histogram!("eventloom_transaction_release_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the number of stale buffered events.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_stale(count: u64) {
        gauge!("eventloom_transaction_buffer_stale_events").set(count as f64);
    }

    /// Record the head of line of one processor's buffer.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_head_of_line(processor: &str, head: Option<(&str, i32, i64)>, age: Duration) {
        if let Some((topic, partition, offset)) = head {
            gauge!(
                "eventloom_transaction_buffer_head_offset",
                "processor" => processor.to_string(),
                "topic" => topic.to_string(),
                "partition" => partition.to_string()
            )
            .set(offset as f64);
        }
        gauge!("eventloom_transaction_buffer_head_age_seconds", "processor" => processor.to_string())
            .set(age.as_secs_f64());
    }
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a handled record.
    pub fn record_disposition(pipeline: &'static str, disposition: &'static str) {
        counter!(
            "eventloom_records_processed_total",
            "pipeline" => pipeline,
            "disposition" => disposition
        )
        .increment(1);
    }
}
