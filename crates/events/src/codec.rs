//! Serialization collaborator for event and command payloads.
//!
//! Each entity type registers its event and command kinds by implementing
//! these traits. Decoding is the exact inverse of encoding, and a kind the
//! entity does not know fails instead of being dropped.

use serde_json::Value as JsonValue;

use provisioner_core::{AggregateId, DomainResult};

use crate::Event;

/// Encodes/decodes an event payload to/from its stored form.
pub trait EventCodec: Event + Sized {
    /// Payload body for storage. The kind travels separately as `event_type()`.
    fn encode(&self, aggregate_id: &AggregateId) -> DomainResult<JsonValue>;

    /// Rebuild a payload from its stored kind and body.
    ///
    /// Fails with `UnrecognizedEvent` for unknown kinds and `Serialization`
    /// for malformed bodies.
    fn decode(aggregate_id: &AggregateId, event_type: &str, payload: JsonValue)
    -> DomainResult<Self>;
}

/// Decodes a command routed as data (kind + JSON body).
pub trait CommandCodec: Sized {
    /// Fails with `UnrecognizedCommand` for unknown kinds and `Serialization`
    /// for malformed bodies.
    fn decode(aggregate_id: AggregateId, command_type: &str, payload: JsonValue)
    -> DomainResult<Self>;
}
