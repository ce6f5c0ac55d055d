//! # Eventloom Runtime
//!
//! Consumer-side runtime for the Eventloom consistency protocol.
//!
//! ## Core Components
//!
//! - **Listener** ([`listener`]): buffers business transaction records and
//!   releases them when the finished marker arrives
//! - **Pipelines** ([`pipeline`]): online and restore record handlers that
//!   decide commit vs. withhold
//! - **Retry** ([`retry`]): reruns commands that lost an optimistic conflict
//! - **Monitor** ([`monitor`]): staleness gauge for the transaction buffer
//! - **Config / Telemetry / Metrics**: environment configuration, tracing
//!   setup and the Prometheus exporter
//!
//! ## Example
//!
//! ```ignore
//! use eventloom_runtime::listener::{BusinessTransactionAwareListener, SnapshotStoreProcessor};
//! use eventloom_runtime::pipeline::OnlinePipeline;
//!
//! let processor = Arc::new(SnapshotStoreProcessor::new(task_store, ValidationMode::Online));
//! let listener = BusinessTransactionAwareListener::new(processor, buffer, "task-service", clock);
//! let online = OnlinePipeline::new(listener, ReplayCoordinator::new(marks));
//!
//! consumer.run(&online).await?;
//! ```

/// Environment configuration
pub mod config;

/// Business-transaction-aware consumer
pub mod listener;

/// Prometheus metrics for observability
pub mod metrics;

/// Staleness monitoring of the transaction buffer
pub mod monitor;

/// Online and restore pipelines
pub mod pipeline;

/// Retry logic for optimistic conflicts
pub mod retry;

/// Tracing subscriber setup
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use listener::{BusinessTransactionAware, BusinessTransactionAwareListener, SnapshotStoreProcessor};
pub use monitor::BufferStalenessMonitor;
pub use pipeline::{OnlinePipeline, RestorePipeline};
pub use retry::{RetryPolicy, retry_on_conflict};
