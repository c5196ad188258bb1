use chrono::{DateTime, Utc};

use provisioner_core::{AggregateId, DomainResult, EventId};

use crate::{Aggregate, Command, EventEnvelope};

/// Rebuild an aggregate by folding its history onto the unborn state.
///
/// This is the only way to obtain a trustworthy state: the result depends on
/// nothing but the ordered events.
pub fn replay<'a, A, I>(id: AggregateId, history: I) -> DomainResult<A>
where
    A: Aggregate,
    I: IntoIterator<Item = &'a EventEnvelope<A::Event>>,
{
    let mut aggregate = A::unborn(id);
    fold(&mut aggregate, history)?;
    Ok(aggregate)
}

/// Fold events, oldest first, into an existing state.
///
/// Stops at the first event the aggregate refuses; events before it stay applied.
pub fn fold<'a, A, I>(aggregate: &mut A, events: I) -> DomainResult<()>
where
    A: Aggregate,
    I: IntoIterator<Item = &'a EventEnvelope<A::Event>>,
{
    for event in events {
        aggregate.apply(event)?;
    }
    Ok(())
}

/// Run the decision function and stamp its output.
///
/// Event `i` (0-based) is assigned version `aggregate.version() + 1 + i`.
/// The aggregate itself is left untouched.
pub fn decide<A>(
    aggregate: &A,
    command: &A::Command,
    occurred_at: DateTime<Utc>,
) -> DomainResult<Vec<EventEnvelope<A::Event>>>
where
    A: Aggregate,
{
    let base = aggregate.version();
    let decided = aggregate.handle(command)?;

    Ok(decided
        .into_iter()
        .zip(base + 1..)
        .map(|(payload, version)| {
            EventEnvelope::new(
                EventId::new(),
                command.target_aggregate_id().clone(),
                A::AGGREGATE_TYPE,
                version,
                occurred_at,
                payload,
            )
        })
        .collect())
}

/// Execute an aggregate command deterministically (no IO, no persistence).
///
/// 1. **Decide**: `decide(aggregate, command)` stamps the produced events
/// 2. **Evolve**: each event is folded into the aggregate
///
/// Useful in tests and for previewing a command. For the persisted pipeline
/// with optimistic concurrency, go through the infra `Repository`.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
    occurred_at: DateTime<Utc>,
) -> DomainResult<Vec<EventEnvelope<A::Event>>>
where
    A: Aggregate,
{
    let events = decide(aggregate, command, occurred_at)?;
    fold(aggregate, &events)?;
    Ok(events)
}
