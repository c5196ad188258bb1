//! Node domain module (event-sourced).
//!
//! Managed machines. A node embeds the images it boots by value (see
//! [`ImageSnapshot`]); it never holds a live reference to another aggregate.

pub mod node;

pub use node::{ImageSnapshot, Netdev, Node, NodeCommand, NodeEvent, NodeFields, NodePatch};
