use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use provisioner_core::{AggregateId, EventId};

/// One immutable fact recorded against one aggregate instance.
///
/// Notes:
/// - **Identity**: `(aggregate_id, version)` identifies the fact; `event_id` is a storage key.
/// - **Ordering**: `version` is gapless per aggregate, starting at 1.
/// - **Timestamp**: `occurred_at` is stamped by the engine at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Position in the aggregate stream.
    version: u64,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        version: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
