//! Aggregate identification types.
//!
//! An [`AggregateIdentifier`] names one revision of one aggregate instance:
//! the aggregate type tag, the instance UUID and the version the instance had
//! after the event that carries the identifier was applied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Version of a snapshot that has not been created yet.
///
/// The creation event of an aggregate therefore carries version `0`.
pub const INITIAL_SNAPSHOT_VERSION: i64 = -1;

/// Error type for `AggregateType` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid aggregate type: {0}")]
pub struct ParseAggregateTypeError(String);

/// Type tag of an aggregate (e.g. `"PROJECT"`, `"TASK"`, `"COMPANY"`).
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (trusted input)
///
/// # Examples
///
/// ```
/// use eventloom_core::aggregate::AggregateType;
///
/// let task = AggregateType::new("TASK");
/// assert_eq!(task.as_str(), "TASK");
///
/// let parsed: AggregateType = "PROJECT".parse().unwrap();
/// assert_eq!(parsed, AggregateType::new("PROJECT"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateType(String);

impl AggregateType {
    /// Create a new `AggregateType` from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the type tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateType {
    type Err = ParseAggregateTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAggregateTypeError(
                "Aggregate type cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for AggregateType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AggregateType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AggregateType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One revision of one aggregate instance. Immutable value type.
///
/// # Examples
///
/// ```
/// use eventloom_core::aggregate::AggregateIdentifier;
/// use uuid::Uuid;
///
/// let id = Uuid::new_v4();
/// let created = AggregateIdentifier::new("TASK", id, 0);
/// let updated = created.next_version();
///
/// assert_eq!(updated.version(), 1);
/// assert_eq!(updated.identifier(), id);
/// assert_eq!(created.version(), 0); // unchanged
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateIdentifier {
    aggregate_type: AggregateType,
    identifier: Uuid,
    version: u64,
}

impl AggregateIdentifier {
    /// Create a new identifier.
    #[must_use]
    pub fn new(aggregate_type: impl Into<AggregateType>, identifier: Uuid, version: u64) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            identifier,
            version,
        }
    }

    /// The aggregate type tag.
    #[must_use]
    pub const fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    /// The aggregate instance UUID.
    #[must_use]
    pub const fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// The aggregate version this identifier refers to.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The same aggregate at the given version.
    #[must_use]
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            aggregate_type: self.aggregate_type.clone(),
            identifier: self.identifier,
            version,
        }
    }

    /// The same aggregate one version later.
    #[must_use]
    pub fn next_version(&self) -> Self {
        self.with_version(self.version.saturating_add(1))
    }
}

impl fmt::Display for AggregateIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.aggregate_type, self.identifier, self.version
        )
    }
}
