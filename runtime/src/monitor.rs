//! Staleness monitoring of the business transaction buffer.
//!
//! A business transaction whose finished marker never arrives stays in the
//! buffer forever. That is not an error the listener can raise; it is
//! surfaced here as the `eventloom_transaction_buffer_stale_events` gauge and
//! a warning log.
//!
//! For every watched processor the monitor also reports the head of line,
//! the oldest buffered event by offset. While it stays buffered the replay
//! offset mark of its partition cannot move past it, so a growing
//! `eventloom_transaction_buffer_head_age_seconds` means the restore pipeline
//! is blocked on that partition.

use crate::metrics::TransactionMetrics;
use eventloom_core::buffer::{BufferedTransactionEvent, TransactionEventBuffer};
use eventloom_core::environment::Clock;
use eventloom_core::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Periodically counts buffered events older than a threshold.
pub struct BufferStalenessMonitor {
    buffer: Arc<dyn TransactionEventBuffer>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
    interval: Duration,
    processors: Vec<String>,
}

impl BufferStalenessMonitor {
    /// Count rows received more than `threshold` ago, every `interval`.
    #[must_use]
    pub fn new(
        buffer: Arc<dyn TransactionEventBuffer>,
        clock: Arc<dyn Clock>,
        threshold: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            buffer,
            clock,
            threshold,
            interval,
            processors: Vec::new(),
        }
    }

    /// Also report the head of line of these processors' buffer rows.
    #[must_use]
    pub fn watching<I, S>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.processors = processors.into_iter().map(Into::into).collect();
        self
    }

    /// Oldest buffered event of `processor` and how long it has been waiting.
    ///
    /// Updates the head-of-line gauges; the age is zero when nothing is
    /// buffered.
    ///
    /// # Errors
    ///
    /// Buffer storage failures.
    pub async fn head_of_line(&self, processor: &str) -> Result<Option<(BufferedTransactionEvent, Duration)>> {
        let Some(head) = self.buffer.first_by_offset(processor).await? else {
            TransactionMetrics::record_head_of_line(processor, None, Duration::ZERO);
            return Ok(None);
        };

        let age = (self.clock.now() - head.received_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        TransactionMetrics::record_head_of_line(
            processor,
            Some((head.topic.as_str(), head.partition, head.offset)),
            age,
        );
        if age > self.threshold {
            tracing::warn!(
                processor,
                topic = %head.topic,
                partition = head.partition,
                offset = head.offset,
                transaction_id = %head.transaction_id,
                age_secs = age.as_secs(),
                "Unfinished business transaction is blocking its partition"
            );
        }
        Ok(Some((head, age)))
    }

    /// Run one check and update the gauges; returns the stale count.
    ///
    /// # Errors
    ///
    /// Buffer storage failures.
    pub async fn check(&self) -> Result<u64> {
        for processor in &self.processors {
            self.head_of_line(processor).await?;
        }

        let threshold = chrono::Duration::from_std(self.threshold).unwrap_or(chrono::Duration::MAX);
        let before = self
            .clock
            .now()
            .checked_sub_signed(threshold)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let stale = self.buffer.count_older_than(before).await?;
        TransactionMetrics::record_stale(stale);
        if stale > 0 {
            tracing::warn!(
                stale,
                threshold_secs = self.threshold.as_secs(),
                "Buffered business transaction events exceed staleness threshold"
            );
        }
        Ok(stale)
    }

    /// Check every `interval` until `shutdown` completes. Failed checks are
    /// logged and do not stop the loop.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Buffer staleness monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        tracing::error!(error = %e, "Buffer staleness check failed");
                    }
                }
            }
        }
    }
}
