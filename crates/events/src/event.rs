/// A domain event payload (the `kind` + entity-specific fields of a fact).
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
///
/// Stream metadata (aggregate id, stream version, timestamp) lives on
/// [`EventEnvelope`](crate::EventEnvelope), not on the payload.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event kind discriminator (e.g. "vnfs.updated").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn schema_version(&self) -> u32 {
        1
    }
}
