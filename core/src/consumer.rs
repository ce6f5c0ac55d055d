//! Inbound port: what a transport does with each consumed record.
//!
//! Transports (the Redpanda consumer, test drivers) hand every record to a
//! [`RecordHandler`] and act on the returned [`Disposition`]. Handlers never
//! sleep or seek; redelivery timing belongs to the transport.

use crate::error::Result;
use crate::record::EventRecord;
use std::future::Future;
use std::pin::Pin;

/// What the transport must do with a handled record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Commit the offset; the record is done.
    Commit,
    /// Do not commit; deliver the record again later.
    Withhold,
}

impl Disposition {
    /// Metric label for this disposition.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Withhold => "withhold",
        }
    }
}

/// Processes records of one consumer group.
///
/// An `Err` that [`is_fatal`](crate::error::ConsistencyError::is_fatal) stops
/// the consumer; any other `Err` is treated like [`Disposition::Withhold`].
pub trait RecordHandler: Send + Sync {
    /// Name used in logs and metrics (e.g. `"online"`, `"restore"`).
    fn name(&self) -> &'static str;

    /// Handle one record.
    ///
    /// # Errors
    ///
    /// Fatal ordering violations and backend failures.
    fn handle<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<Disposition>> + Send + 'a>>;

    /// Called after the transport durably committed `record`'s offset.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn on_committed<'a>(
        &'a self,
        _record: &'a EventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}
