use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use provisioner_core::{AggregateId, DomainResult, EventId, ExpectedVersion};
use provisioner_events::{EventCodec, EventEnvelope};
use std::sync::Arc;

/// An event ready to be appended to a stream.
///
/// Unlike a bare payload, it already carries its stream `version`: the engine
/// decides versions (`current + 1 ..`) and the store only verifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Encode a typed envelope through the entity's codec.
    pub fn from_envelope<E>(envelope: &EventEnvelope<E>) -> DomainResult<Self>
    where
        E: EventCodec,
    {
        let payload = envelope.payload();
        Ok(Self {
            event_id: envelope.event_id(),
            aggregate_id: envelope.aggregate_id().clone(),
            aggregate_type: envelope.aggregate_type().to_string(),
            version: envelope.version(),
            event_type: payload.event_type().to_string(),
            schema_version: payload.schema_version(),
            occurred_at: envelope.occurred_at(),
            payload: payload.encode(envelope.aggregate_id())?,
        })
    }
}

/// A persisted event, as returned by `load_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream (1-based, gapless).
    pub version: u64,

    pub event_type: String,
    pub schema_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode the payload back into the entity's typed event.
    ///
    /// Unknown kinds fail with `UnrecognizedEvent`; they are never skipped.
    pub fn decode<E>(&self) -> DomainResult<EventEnvelope<E>>
    where
        E: EventCodec,
    {
        let payload = E::decode(&self.aggregate_id, &self.event_type, self.payload.clone())?;
        Ok(EventEnvelope::new(
            self.event_id,
            self.aggregate_id.clone(),
            self.aggregate_type.clone(),
            self.version,
            self.occurred_at,
            payload,
        ))
    }
}

impl From<UncommittedEvent> for StoredEvent {
    fn from(e: UncommittedEvent) -> Self {
        Self {
            event_id: e.event_id,
            aggregate_id: e.aggregate_id,
            aggregate_type: e.aggregate_type,
            version: e.version,
            event_type: e.event_type,
            schema_version: e.schema_version,
            occurred_at: e.occurred_at,
            payload: e.payload,
        }
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, stream integrity)
/// as opposed to domain errors (validation, lifecycle rules).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream moved past the version the writer read.
    #[error("optimistic concurrency check failed for {aggregate_id}: expected version {expected}, found {actual}")]
    Concurrency {
        aggregate_id: AggregateId,
        expected: u64,
        actual: u64,
    },

    #[error("no events stored for aggregate {aggregate_id}")]
    NotFound { aggregate_id: AggregateId },

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// A loaded stream violates an ordering or ownership invariant.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// The backing storage failed (connection, IO, driver).
    #[error("event store backend error: {0}")]
    Backend(String),
}

/// Append-only event store, one stream per aggregate id.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates aggregate scoping (all events target `aggregate_id` with one aggregate type)
/// - Checks optimistic concurrency (the stream's current version must equal `expected_version`)
/// - Verifies the batch continues the stream (`expected + 1`, `expected + 2`, ...)
/// - Persists events atomically (all or nothing) and returns the new stream version
///
/// ## Load Semantics
///
/// `load_events()` returns the stream oldest first, or `NotFound` if it is empty.
///
/// Implementations must never let two appends claim the same version for the
/// same aggregate id.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        aggregate_id: &AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError>;

    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        aggregate_id: &AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        (**self).append(aggregate_id, expected_version, events)
    }

    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_events(aggregate_id)
    }
}

/// Batch checks shared by every backend, run before touching storage.
///
/// Returns the batch's aggregate type (`None` for an empty batch).
pub(crate) fn validate_batch(
    aggregate_id: &AggregateId,
    expected_version: ExpectedVersion,
    events: &[UncommittedEvent],
) -> Result<Option<String>, EventStoreError> {
    let Some(first) = events.first() else {
        return Ok(None);
    };
    let aggregate_type = &first.aggregate_type;

    for (e, version) in events.iter().zip(expected_version.next()..) {
        if &e.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch for {aggregate_id} contains an event for {}",
                e.aggregate_id
            )));
        }
        if &e.aggregate_type != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch mixes aggregate types '{aggregate_type}' and '{}'",
                e.aggregate_type
            )));
        }
        if e.version != version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event for {aggregate_id} carries version {}, expected {version}",
                e.version
            )));
        }
    }

    Ok(Some(aggregate_type.clone()))
}
