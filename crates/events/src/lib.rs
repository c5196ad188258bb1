//! `provisioner-events`: event and command contracts plus the replay/decide harness.
//!
//! - [`Event`] / [`Command`]: payload contracts with stable kind discriminators
//! - [`EventEnvelope`]: one recorded fact (aggregate id, version, timestamp, payload)
//! - [`Aggregate`]: pure `apply` / `handle` pair
//! - [`lifecycle`]: the generic create / update / delete state machine
//! - [`codec`]: per-entity serialization collaborator

pub mod aggregate;
pub mod codec;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod lifecycle;

pub use aggregate::Aggregate;
pub use codec::{CommandCodec, EventCodec};
pub use command::{Command, CommandIntent};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{decide, execute, fold, replay};
pub use lifecycle::{
    CommandKind, CommandTypes, EntityCommand, EntityEvent, EntityState, EventTypes, Fields,
};
