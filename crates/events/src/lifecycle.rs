//! Generic create / update / delete state machine shared by every tracked entity.
//!
//! An entity type only describes its field set (a [`Fields`] implementation and
//! its all-optional `Patch`). Replay and decision rules live here, once:
//!
//! | event          | effect on state                                                    |
//! |----------------|--------------------------------------------------------------------|
//! | `Created`      | status `active`, `created_at = updated_at = occurred_at`, present fields set |
//! | `FieldChanged` | `updated_at = occurred_at`, present **non-zero** fields overwrite  |
//! | `Deleted`      | status `deleted`, `updated_at = occurred_at`, fields kept for audit |
//!
//! | command  | precondition                 | emits          |
//! |----------|------------------------------|----------------|
//! | `Create` | status is `unborn`           | `Created`      |
//! | `Update` | none                         | `FieldChanged` |
//! | `Delete` | status is not `deleted`      | `Deleted`      |

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use provisioner_core::{AggregateId, AggregateRoot, DomainError, DomainResult, LifecycleStatus};

use crate::{Aggregate, Command, CommandCodec, CommandIntent, Event, EventCodec, EventEnvelope};

/// Event kind names of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTypes {
    pub created: &'static str,
    pub changed: &'static str,
    pub deleted: &'static str,
}

/// Command kind names of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTypes {
    pub create: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
}

/// Entity-specific field set tracked by an [`EntityState`].
pub trait Fields: Default + Clone + PartialEq + core::fmt::Debug + Send + Sync + 'static {
    /// Change payload: every field optional, `None` meaning "not mentioned".
    type Patch: Default
        + Clone
        + PartialEq
        + core::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const AGGREGATE_TYPE: &'static str;
    const EVENTS: EventTypes;
    const COMMANDS: CommandTypes;

    /// Created rule: every present field is set.
    fn assign(&mut self, patch: &Self::Patch);

    /// Field-changed rule: every present, non-zero field overwrites.
    fn merge(&mut self, patch: &Self::Patch);

    /// Reject malformed payloads before any event is produced. The error is
    /// the reason; `handle` attaches the aggregate id and command kind.
    fn validate(_patch: &Self::Patch) -> Result<(), String> {
        Ok(())
    }
}

/// Materialized state of one entity, rebuilt from its events.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState<F: Fields> {
    id: AggregateId,
    version: u64,
    status: LifecycleStatus,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    fields: F,
}

impl<F: Fields> EntityState<F> {
    pub fn fields(&self) -> &F {
        &self.fields
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status == LifecycleStatus::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.status == LifecycleStatus::Deleted
    }

    fn validate(&self, command: &EntityCommand<F>, patch: &F::Patch) -> DomainResult<()> {
        F::validate(patch)
            .map_err(|reason| DomainError::validation(&self.id, command.command_type(), reason))
    }
}

impl<F: Fields> AggregateRoot for EntityState<F> {
    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn status(&self) -> LifecycleStatus {
        self.status
    }
}

/// Events of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent<F: Fields> {
    Created(F::Patch),
    FieldChanged(F::Patch),
    Deleted,
}

impl<F: Fields> Event for EntityEvent<F> {
    fn event_type(&self) -> &'static str {
        match self {
            EntityEvent::Created(_) => F::EVENTS.created,
            EntityEvent::FieldChanged(_) => F::EVENTS.changed,
            EntityEvent::Deleted => F::EVENTS.deleted,
        }
    }
}

impl<F: Fields> EventCodec for EntityEvent<F> {
    fn encode(&self, aggregate_id: &AggregateId) -> DomainResult<JsonValue> {
        match self {
            EntityEvent::Created(patch) | EntityEvent::FieldChanged(patch) => {
                serde_json::to_value(patch).map_err(|e| {
                    DomainError::serialization(aggregate_id, self.event_type(), e)
                })
            }
            EntityEvent::Deleted => Ok(JsonValue::Null),
        }
    }

    fn decode(
        aggregate_id: &AggregateId,
        event_type: &str,
        payload: JsonValue,
    ) -> DomainResult<Self> {
        let types = F::EVENTS;
        if event_type == types.created {
            decode_patch::<F>(aggregate_id, event_type, payload).map(EntityEvent::Created)
        } else if event_type == types.changed {
            decode_patch::<F>(aggregate_id, event_type, payload).map(EntityEvent::FieldChanged)
        } else if event_type == types.deleted {
            Ok(EntityEvent::Deleted)
        } else {
            Err(DomainError::unrecognized_event(aggregate_id, event_type))
        }
    }
}

/// Command kinds of the generic lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind<P> {
    Create(P),
    Update(P),
    Delete,
}

/// A command directed at one entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCommand<F: Fields> {
    aggregate_id: AggregateId,
    kind: CommandKind<F::Patch>,
}

impl<F: Fields> EntityCommand<F> {
    pub fn new(aggregate_id: AggregateId, kind: CommandKind<F::Patch>) -> Self {
        Self { aggregate_id, kind }
    }

    pub fn create(aggregate_id: AggregateId, patch: F::Patch) -> Self {
        Self::new(aggregate_id, CommandKind::Create(patch))
    }

    pub fn update(aggregate_id: AggregateId, patch: F::Patch) -> Self {
        Self::new(aggregate_id, CommandKind::Update(patch))
    }

    pub fn delete(aggregate_id: AggregateId) -> Self {
        Self::new(aggregate_id, CommandKind::Delete)
    }

    pub fn kind(&self) -> &CommandKind<F::Patch> {
        &self.kind
    }
}

impl<F: Fields> Command for EntityCommand<F> {
    fn target_aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    fn command_type(&self) -> &'static str {
        match self.kind {
            CommandKind::Create(_) => F::COMMANDS.create,
            CommandKind::Update(_) => F::COMMANDS.update,
            CommandKind::Delete => F::COMMANDS.delete,
        }
    }

    fn intent(&self) -> CommandIntent {
        match self.kind {
            CommandKind::Create(_) => CommandIntent::Create,
            CommandKind::Update(_) => CommandIntent::Update,
            CommandKind::Delete => CommandIntent::Delete,
        }
    }
}

impl<F: Fields> CommandCodec for EntityCommand<F> {
    fn decode(
        aggregate_id: AggregateId,
        command_type: &str,
        payload: JsonValue,
    ) -> DomainResult<Self> {
        let types = F::COMMANDS;
        let kind = if command_type == types.create {
            CommandKind::Create(decode_patch::<F>(&aggregate_id, command_type, payload)?)
        } else if command_type == types.update {
            CommandKind::Update(decode_patch::<F>(&aggregate_id, command_type, payload)?)
        } else if command_type == types.delete {
            CommandKind::Delete
        } else {
            return Err(DomainError::unrecognized_command(&aggregate_id, command_type));
        };
        Ok(Self::new(aggregate_id, kind))
    }
}

fn decode_patch<F: Fields>(
    aggregate_id: &AggregateId,
    kind: &str,
    payload: JsonValue,
) -> DomainResult<F::Patch> {
    if payload.is_null() {
        return Ok(F::Patch::default());
    }
    serde_json::from_value(payload).map_err(|e| DomainError::serialization(aggregate_id, kind, e))
}

impl<F: Fields> Aggregate for EntityState<F> {
    const AGGREGATE_TYPE: &'static str = F::AGGREGATE_TYPE;

    type Command = EntityCommand<F>;
    type Event = EntityEvent<F>;

    fn unborn(id: AggregateId) -> Self {
        Self {
            id,
            version: 0,
            status: LifecycleStatus::Unborn,
            created_at: None,
            updated_at: None,
            fields: F::default(),
        }
    }

    fn apply(&mut self, event: &EventEnvelope<Self::Event>) -> DomainResult<()> {
        // The first event establishes the id; every later one must match it.
        if self.version == 0 {
            self.id = event.aggregate_id().clone();
        } else if event.aggregate_id() != &self.id {
            return Err(DomainError::AggregateMismatch {
                expected: self.id.to_string(),
                found: event.aggregate_id().to_string(),
                kind: event.payload().event_type().to_string(),
            });
        }

        let at = event.occurred_at();
        match event.payload() {
            EntityEvent::Created(patch) => {
                self.status = LifecycleStatus::Active;
                self.created_at = Some(at);
                self.updated_at = Some(at);
                self.fields.assign(patch);
            }
            EntityEvent::FieldChanged(patch) => {
                self.updated_at = Some(at);
                self.fields.merge(patch);
            }
            EntityEvent::Deleted => {
                self.updated_at = Some(at);
                self.status = LifecycleStatus::Deleted;
            }
        }
        self.version = event.version();

        Ok(())
    }

    fn handle(&self, command: &Self::Command) -> DomainResult<Vec<Self::Event>> {
        if command.target_aggregate_id() != &self.id {
            return Err(DomainError::AggregateMismatch {
                expected: self.id.to_string(),
                found: command.target_aggregate_id().to_string(),
                kind: command.command_type().to_string(),
            });
        }

        match command.kind() {
            CommandKind::Create(patch) => {
                if self.status != LifecycleStatus::Unborn {
                    return Err(DomainError::already_exists(&self.id, command.command_type()));
                }
                self.validate(command, patch)?;
                Ok(vec![EntityEvent::Created(patch.clone())])
            }
            CommandKind::Update(patch) => {
                self.validate(command, patch)?;
                Ok(vec![EntityEvent::FieldChanged(patch.clone())])
            }
            CommandKind::Delete => {
                if self.status == LifecycleStatus::Deleted {
                    return Err(DomainError::already_deleted(&self.id, command.command_type()));
                }
                Ok(vec![EntityEvent::Deleted])
            }
        }
    }
}
