//! Optimistic version validation between a snapshot and an incoming event.
//!
//! | event version `e` vs snapshot version `v` | Online | Restore |
//! |---|---|---|
//! | `e == v + 1` | apply | apply |
//! | `e > v + 1` | fatal gap | fatal gap |
//! | `e <= v` | conflict | skip |
//!
//! A gap means an event was lost or delivered out of causal order, so it is
//! fatal in both modes. A stale event is a retryable conflict on the online
//! path (some other writer won the race) and an idempotent no-op during
//! replay (the event was already applied before a crash or redelivery).
//!
//! # Example
//!
//! ```
//! use eventloom_core::validation::{ValidationMode, VersionCheck};
//!
//! assert_eq!(VersionCheck::evaluate(4, 5, ValidationMode::Online), VersionCheck::Apply);
//! assert_eq!(VersionCheck::evaluate(4, 4, ValidationMode::Restore), VersionCheck::Skip);
//! assert_eq!(VersionCheck::evaluate(4, 4, ValidationMode::Online), VersionCheck::Conflict);
//! assert_eq!(VersionCheck::evaluate(1, 3, ValidationMode::Restore), VersionCheck::FatalGap);
//! ```

use crate::aggregate::{AggregateIdentifier, INITIAL_SNAPSHOT_VERSION};
use crate::error::{ConsistencyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipeline is applying the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Live processing; a stale event is a conflict.
    Online,
    /// Replay from the log; a stale event is skipped.
    Restore,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Outcome of comparing an event version with a snapshot version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VersionCheck {
    /// The event is the direct successor; apply it.
    Apply,
    /// Stale event during replay; ignore it.
    Skip,
    /// Stale event on the online path; reload and retry the command.
    Conflict,
    /// At least one version is missing; stop processing.
    FatalGap,
}

impl VersionCheck {
    /// Pure comparison without logging or metrics.
    #[must_use]
    pub fn evaluate(snapshot_version: i64, event_version: u64, mode: ValidationMode) -> Self {
        let difference = i128::from(event_version) - i128::from(snapshot_version);
        match (difference, mode) {
            (1, _) => Self::Apply,
            (d, _) if d > 1 => Self::FatalGap,
            (_, ValidationMode::Online) => Self::Conflict,
            (_, ValidationMode::Restore) => Self::Skip,
        }
    }

    /// Metric label for this outcome.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Skip => "skip",
            Self::Conflict => "conflict",
            Self::FatalGap => "fatal_gap",
        }
    }

    /// Map the outcome onto the `Result<bool>` form.
    ///
    /// # Errors
    ///
    /// [`ConsistencyError::OptimisticConflict`] for `Conflict`,
    /// [`ConsistencyError::FatalOrderingViolation`] for `FatalGap`.
    pub fn into_result(self, event: &AggregateIdentifier, snapshot_version: i64) -> Result<bool> {
        match self {
            Self::Apply => Ok(true),
            Self::Skip => Ok(false),
            Self::Conflict => Err(ConsistencyError::OptimisticConflict {
                aggregate_type: event.aggregate_type().to_string(),
                identifier: event.identifier(),
                snapshot_version,
                event_version: event.version(),
            }),
            Self::FatalGap => Err(ConsistencyError::FatalOrderingViolation {
                aggregate_type: event.aggregate_type().to_string(),
                identifier: event.identifier(),
                snapshot_version,
                event_version: event.version(),
            }),
        }
    }
}

/// Validates incoming events against the local snapshot version.
///
/// Stateless; every outcome is logged and counted in
/// `eventloom_version_check_total{outcome}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventVersionValidator;

impl EventVersionValidator {
    /// Create a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check `event` against the current snapshot version.
    ///
    /// `snapshot_version` is `None` when no snapshot exists, which is
    /// treated as [`INITIAL_SNAPSHOT_VERSION`].
    #[must_use]
    pub fn check(
        &self,
        snapshot_version: Option<i64>,
        event: &AggregateIdentifier,
        mode: ValidationMode,
    ) -> VersionCheck {
        let snapshot_version = snapshot_version.unwrap_or(INITIAL_SNAPSHOT_VERSION);
        let outcome = VersionCheck::evaluate(snapshot_version, event.version(), mode);

        match outcome {
            VersionCheck::Apply => {}
            VersionCheck::Skip => tracing::debug!(
                aggregate = %event,
                snapshot_version,
                "Event already applied, skipping during replay"
            ),
            VersionCheck::Conflict => tracing::warn!(
                aggregate = %event,
                snapshot_version,
                "Stale event on online path"
            ),
            VersionCheck::FatalGap => tracing::error!(
                aggregate = %event,
                snapshot_version,
                mode = %mode,
                "Version gap detected, events missing or out of order"
            ),
        }
        metrics::counter!("eventloom_version_check_total", "outcome" => outcome.as_label())
            .increment(1);

        outcome
    }

    /// Whether `event` may be applied.
    ///
    /// `Ok(false)` is an idempotent skip during replay.
    ///
    /// # Errors
    ///
    /// [`ConsistencyError::FatalOrderingViolation`] on a version gap in either
    /// mode; [`ConsistencyError::OptimisticConflict`] on a stale event in
    /// [`ValidationMode::Online`].
    pub fn can_apply(
        &self,
        snapshot_version: Option<i64>,
        event: &AggregateIdentifier,
        mode: ValidationMode,
    ) -> Result<bool> {
        self.check(snapshot_version, event, mode).into_result(
            event,
            snapshot_version.unwrap_or(INITIAL_SNAPSHOT_VERSION),
        )
    }
}
