use std::collections::HashMap;
use std::sync::RwLock;

use provisioner_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

/// In-memory append-only event store.
///
/// Intended for tests/dev. The version check and the append happen under one
/// write lock, so concurrent writers to the same stream are linearized.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }

    /// Total number of stored events across all streams.
    pub fn len(&self) -> Result<usize, EventStoreError> {
        self.streams
            .read()
            .map(|streams| streams.values().map(Vec::len).sum())
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, EventStoreError> {
        Ok(self.len()? == 0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        aggregate_id: &AggregateId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let aggregate_type = validate_batch(aggregate_id, expected_version, &events)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let current = streams
            .get(aggregate_id)
            .map(|s| Self::current_version(s))
            .unwrap_or(0);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version.value(),
                actual: current,
            });
        }

        let Some(aggregate_type) = aggregate_type else {
            return Ok(current);
        };

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = streams.get(aggregate_id).and_then(|s| s.first()) {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream {aggregate_id} holds '{}', attempted append with '{aggregate_type}'",
                    existing.aggregate_type
                )));
            }
        }

        let stream = streams.entry(aggregate_id.clone()).or_default();
        stream.extend(events.into_iter().map(StoredEvent::from));

        Ok(Self::current_version(stream))
    }

    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        match streams.get(aggregate_id) {
            Some(stream) if !stream.is_empty() => Ok(stream.clone()),
            _ => Err(EventStoreError::NotFound {
                aggregate_id: aggregate_id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use provisioner_core::EventId;
    use serde_json::json;

    fn id(value: &str) -> AggregateId {
        AggregateId::new(value).unwrap()
    }

    fn event(aggregate: &str, aggregate_type: &str, version: u64) -> UncommittedEvent {
        UncommittedEvent {
            event_id: EventId::new(),
            aggregate_id: id(aggregate),
            aggregate_type: aggregate_type.to_string(),
            version,
            event_type: format!("{aggregate_type}.updated"),
            schema_version: 1,
            occurred_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            payload: json!({ "size": version }),
        }
    }

    #[test]
    fn poisoned_lock_is_a_backend_error() {
        let store = InMemoryEventStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.streams.write().unwrap();
            panic!("writer died holding the lock");
        }));

        assert!(matches!(store.len(), Err(EventStoreError::Backend(_))));
        assert!(matches!(store.is_empty(), Err(EventStoreError::Backend(_))));
        assert!(matches!(store.load_events(&id("img-1")), Err(EventStoreError::Backend(_))));
    }

    #[test]
    fn empty_stream_is_not_found() {
        let store = InMemoryEventStore::new();
        let err = store.load_events(&id("img-1")).unwrap_err();
        assert!(matches!(err, EventStoreError::NotFound { .. }));
    }

    #[test]
    fn append_returns_new_version_and_load_preserves_order() {
        let store = InMemoryEventStore::new();
        let v = store
            .append(&id("img-1"), ExpectedVersion::EMPTY, vec![event("img-1", "vnfs", 1), event("img-1", "vnfs", 2)])
            .unwrap();
        assert_eq!(v, 2);

        let v = store
            .append(&id("img-1"), ExpectedVersion(2), vec![event("img-1", "vnfs", 3)])
            .unwrap();
        assert_eq!(v, 3);

        let versions: Vec<u64> = store.load_events(&id("img-1")).unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn stale_expected_version_commits_nothing() {
        let store = InMemoryEventStore::new();
        store
            .append(&id("img-1"), ExpectedVersion::EMPTY, vec![event("img-1", "vnfs", 1)])
            .unwrap();

        let err = store
            .append(&id("img-1"), ExpectedVersion::EMPTY, vec![event("img-1", "vnfs", 1)])
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::Concurrency { expected: 0, actual: 1, .. }
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn batch_must_continue_the_stream_without_gaps() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(&id("img-1"), ExpectedVersion::EMPTY, vec![event("img-1", "vnfs", 1), event("img-1", "vnfs", 3)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn batch_must_target_the_named_aggregate() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(&id("img-1"), ExpectedVersion::EMPTY, vec![event("img-2", "vnfs", 1)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        store
            .append(&id("x"), ExpectedVersion::EMPTY, vec![event("x", "vnfs", 1)])
            .unwrap();

        let err = store
            .append(&id("x"), ExpectedVersion(1), vec![event("x", "bootstrap", 2)])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn empty_batch_still_checks_the_version() {
        let store = InMemoryEventStore::new();
        assert_eq!(store.append(&id("x"), ExpectedVersion::EMPTY, vec![]).unwrap(), 0);
        assert!(store.append(&id("x"), ExpectedVersion(4), vec![]).is_err());
    }
}
