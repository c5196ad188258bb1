//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store, validate the stream, replay onto the unborn state
//!   ↓
//! 2. Handle command (pure decision logic, produces versioned events)
//!   ↓
//! 3. Append with expected version = loaded version (optimistic concurrency)
//!   ↓
//! 4. Fold the appended events into the loaded state, return its version
//! ```
//!
//! The repository holds no state between calls. Every `load` and `apply`
//! builds its own aggregate value from the store.

use std::marker::PhantomData;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use provisioner_core::{
    AggregateId, AggregateRoot, Clock, DomainError, ExpectedVersion, LifecycleStatus, SystemClock,
};
use provisioner_events::{Aggregate, Command, CommandCodec, CommandIntent, decide, fold};

use crate::config::{DeletedUpdatePolicy, RepositoryConfig};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Lifecycle, validation, codec or version-conflict failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage failure, passed through unmodified.
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::NotFound { aggregate_id } => DomainError::not_found(aggregate_id).into(),
            other => RepositoryError::Store(other),
        }
    }
}

impl RepositoryError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, RepositoryError::Domain(e) if e.is_version_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::Domain(e) if e.is_not_found())
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            RepositoryError::Domain(e) => Some(e),
            RepositoryError::Store(_) => None,
        }
    }
}

/// Load/apply engine for one aggregate type over an explicit store handle.
///
/// ## Generic Parameters
///
/// - `A`: the aggregate type
/// - `S`: event store (share one between repositories with `Arc<S>`)
/// - `C`: clock stamping `occurred_at` at append time
#[derive(Debug)]
pub struct Repository<A, S, C = SystemClock> {
    store: S,
    clock: C,
    config: RepositoryConfig,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> Repository<A, S, SystemClock> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock, RepositoryConfig::default())
    }
}

impl<A, S, C> Repository<A, S, C> {
    pub fn with_clock(store: S, clock: C, config: RepositoryConfig) -> Self {
        Self {
            store,
            clock,
            config,
            _aggregate: PhantomData,
        }
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }
}

impl<A, S, C> Repository<A, S, C>
where
    A: Aggregate,
    S: EventStore,
    C: Clock,
{
    /// Rebuild the aggregate from its full stream.
    ///
    /// Fails with `NotFound` when the store holds no events for `id`.
    #[instrument(skip_all, fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %id), err)]
    pub fn load(&self, id: &AggregateId) -> Result<A, RepositoryError> {
        let stream = self.store.load_events(id)?;
        validate_loaded_stream::<A>(id, &stream)?;

        let mut aggregate = A::unborn(id.clone());
        for stored in &stream {
            let envelope = stored.decode::<A::Event>()?;
            aggregate.apply(&envelope)?;
        }
        debug!(version = aggregate.version(), "aggregate loaded");
        Ok(aggregate)
    }

    /// Read-modify-write one command. Returns the aggregate's new version.
    ///
    /// A concurrent writer that appended after the load turns into
    /// `VersionConflict`; nothing is committed and the caller may retry.
    pub fn apply(&self, command: &A::Command) -> Result<u64, RepositoryError> {
        self.apply_when(command, |_| Ok(()))
    }

    /// `apply`, refused with the precondition's error when it rejects the
    /// loaded state.
    ///
    /// The precondition sees exactly the state the append is versioned
    /// against, so a rival write that would change its verdict surfaces as
    /// `VersionConflict` instead of slipping past it.
    #[instrument(
        skip_all,
        fields(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %command.target_aggregate_id(),
            command = command.command_type()
        ),
        err
    )]
    pub fn apply_when<P>(&self, command: &A::Command, precondition: P) -> Result<u64, RepositoryError>
    where
        P: Fn(&A) -> Result<(), DomainError>,
    {
        let id = command.target_aggregate_id();

        let mut state = match self.load(id) {
            Ok(state) => state,
            Err(e) if e.is_not_found() => A::unborn(id.clone()),
            Err(e) => return Err(e),
        };

        self.enforce_deleted_update_policy(&state, command)?;
        precondition(&state)?;

        let events = decide(&state, command, self.clock.now())?;
        if events.is_empty() {
            return Ok(state.version());
        }

        let uncommitted = events
            .iter()
            .map(UncommittedEvent::from_envelope)
            .collect::<Result<Vec<_>, _>>()?;

        let expected = ExpectedVersion(state.version());
        match self.store.append(id, expected, uncommitted) {
            Ok(_) => {}
            Err(EventStoreError::Concurrency { expected, actual, .. }) => {
                warn!(expected, actual, "version conflict");
                return Err(DomainError::VersionConflict {
                    aggregate_id: id.to_string(),
                    command: command.command_type().to_string(),
                    expected,
                    actual,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        fold(&mut state, &events)?;
        info!(version = state.version(), events = events.len(), "command applied");
        Ok(state.version())
    }

    /// Decode a command routed as data, then `apply` it.
    pub fn apply_encoded(
        &self,
        id: AggregateId,
        command_type: &str,
        payload: JsonValue,
    ) -> Result<u64, RepositoryError>
    where
        A::Command: CommandCodec,
    {
        let command = <A::Command as CommandCodec>::decode(id, command_type, payload)?;
        self.apply(&command)
    }

    /// `apply`, re-run from a fresh load on `VersionConflict` only.
    ///
    /// Makes at most `config.max_conflict_retries` extra attempts; any other
    /// error is returned immediately.
    pub fn apply_with_retry(&self, command: &A::Command) -> Result<u64, RepositoryError> {
        self.apply_with_retry_when(command, |_| Ok(()))
    }

    /// `apply_with_retry` with a precondition re-checked on every attempt.
    pub fn apply_with_retry_when<P>(&self, command: &A::Command, precondition: P) -> Result<u64, RepositoryError>
    where
        P: Fn(&A) -> Result<(), DomainError>,
    {
        let mut attempt = 0u32;
        loop {
            match self.apply_when(command, &precondition) {
                Err(e) if e.is_version_conflict() && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    debug!(
                        aggregate_id = %command.target_aggregate_id(),
                        command = command.command_type(),
                        attempt,
                        "retrying after version conflict"
                    );
                }
                result => return result,
            }
        }
    }

    fn enforce_deleted_update_policy(&self, state: &A, command: &A::Command) -> Result<(), RepositoryError> {
        if self.config.deleted_updates == DeletedUpdatePolicy::Reject
            && command.intent() == CommandIntent::Update
            && state.status() == LifecycleStatus::Deleted
        {
            return Err(DomainError::already_deleted(state.id(), command.command_type()).into());
        }
        Ok(())
    }
}

/// Reject streams a correct store can never return: foreign ids, foreign
/// aggregate types, or versions that are not exactly `1, 2, 3, ...`.
fn validate_loaded_stream<A: Aggregate>(id: &AggregateId, stream: &[StoredEvent]) -> Result<(), EventStoreError> {
    for (e, expected) in stream.iter().zip(1u64..) {
        if &e.aggregate_id != id {
            return Err(EventStoreError::CorruptStream(format!(
                "stream {id} contains an event of aggregate {} at version {}",
                e.aggregate_id, e.version
            )));
        }
        if e.aggregate_type != A::AGGREGATE_TYPE {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "stream {id} holds '{}', loaded as '{}'",
                e.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        if e.version != expected {
            return Err(EventStoreError::CorruptStream(format!(
                "stream {id} has version {} where {expected} was expected",
                e.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use provisioner_core::{EventId, FixedClock};
    use provisioner_images::{Bootstrap, Vnfs};
    use serde_json::json;

    use crate::event_store::InMemoryEventStore;

    fn id(value: &str) -> AggregateId {
        AggregateId::new(value).unwrap()
    }

    fn stored(aggregate: &str, aggregate_type: &str, version: u64) -> StoredEvent {
        StoredEvent {
            event_id: EventId::new(),
            aggregate_id: id(aggregate),
            aggregate_type: aggregate_type.to_string(),
            version,
            event_type: "vnfs.updated".to_string(),
            schema_version: 1,
            occurred_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            payload: json!({}),
        }
    }

    #[test]
    fn loaded_stream_must_be_gapless_from_one() {
        let ok = [stored("img-1", "vnfs", 1), stored("img-1", "vnfs", 2)];
        assert!(validate_loaded_stream::<Vnfs>(&id("img-1"), &ok).is_ok());

        let gap = [stored("img-1", "vnfs", 1), stored("img-1", "vnfs", 3)];
        assert!(matches!(
            validate_loaded_stream::<Vnfs>(&id("img-1"), &gap),
            Err(EventStoreError::CorruptStream(_))
        ));

        let late_start = [stored("img-1", "vnfs", 2)];
        assert!(validate_loaded_stream::<Vnfs>(&id("img-1"), &late_start).is_err());
    }

    #[test]
    fn loaded_stream_must_belong_to_the_requested_aggregate() {
        let foreign = [stored("img-2", "vnfs", 1)];
        assert!(matches!(
            validate_loaded_stream::<Vnfs>(&id("img-1"), &foreign),
            Err(EventStoreError::CorruptStream(_))
        ));

        let other_type = [stored("img-1", "vnfs", 1)];
        assert!(matches!(
            validate_loaded_stream::<Bootstrap>(&id("img-1"), &other_type),
            Err(EventStoreError::AggregateTypeMismatch(_))
        ));
    }

    #[test]
    fn store_not_found_becomes_domain_not_found() {
        let repo: Repository<Vnfs, _> = Repository::new(InMemoryEventStore::new());
        let err = repo.load(&id("missing")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.as_domain(), Some(&DomainError::not_found("missing")));
    }

    #[test]
    fn occurred_at_comes_from_the_repository_clock() {
        use provisioner_images::{VnfsCommand, VnfsPatch};

        let at = Utc.timestamp_opt(1_650_000_000, 0).unwrap();
        let store = std::sync::Arc::new(InMemoryEventStore::new());
        let repo: Repository<Vnfs, _, _> =
            Repository::with_clock(store.clone(), FixedClock(at), RepositoryConfig::default());

        repo.apply(&VnfsCommand::create(id("img-1"), VnfsPatch::default())).unwrap();

        let events = store.load_events(&id("img-1")).unwrap();
        assert_eq!(events[0].occurred_at, at);
        assert_eq!(repo.load(&id("img-1")).unwrap().created_at(), Some(at));
    }
}
