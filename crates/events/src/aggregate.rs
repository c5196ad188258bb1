//! Aggregate execution semantics.

use provisioner_core::{AggregateId, AggregateRoot, DomainResult};

use crate::{Command, Event, EventCodec, EventEnvelope};

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns event payloads.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. `handle` never mutates
/// state; the events it returns are stamped by the engine with consecutive
/// versions starting at `self.version() + 1`.
pub trait Aggregate: AggregateRoot + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable aggregate type name (e.g. "vnfs"), stored with every event.
    const AGGREGATE_TYPE: &'static str;

    type Command: Command;
    type Event: Event + EventCodec;

    /// The state of an aggregate before any event has been applied.
    fn unborn(id: AggregateId) -> Self;

    /// Fold one event into state.
    ///
    /// Must be deterministic: replaying the same sequence from `unborn` always
    /// yields the same state.
    fn apply(&mut self, event: &EventEnvelope<Self::Event>) -> DomainResult<()>;

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> DomainResult<Vec<Self::Event>>;
}
