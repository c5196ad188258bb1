//! Aggregate root trait and the version/lifecycle primitives shared by every
//! event-sourced entity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Returns the aggregate identifier.
    fn id(&self) -> &AggregateId;

    /// Version of the last applied event, 0 if none has been applied.
    fn version(&self) -> u64;

    /// Coarse lifecycle state gating which commands are legal.
    fn status(&self) -> LifecycleStatus;
}

/// Coarse lifecycle of an aggregate.
///
/// `Unborn -> Active -> Deleted`; no transition leaves `Deleted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// No "created" event has been applied yet.
    #[default]
    Unborn,
    Active,
    /// Terminal. Field values are kept for audit.
    Deleted,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Unborn => "unborn",
            LifecycleStatus::Active => "active",
            LifecycleStatus::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimistic concurrency expectation for an aggregate stream.
///
/// Holds the version the writer observed when it loaded the aggregate. An
/// append only succeeds while the stream is still at exactly that version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedVersion(pub u64);

impl ExpectedVersion {
    /// Expectation for a stream with no events.
    pub const EMPTY: ExpectedVersion = ExpectedVersion(0);

    pub fn value(self) -> u64 {
        self.0
    }

    /// Version the first appended event must carry.
    pub fn next(self) -> u64 {
        self.0 + 1
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, aggregate_id: &AggregateId, command: &str, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::VersionConflict {
                aggregate_id: aggregate_id.to_string(),
                command: command.to_string(),
                expected: self.0,
                actual,
            })
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
