//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant raised by the command/event engine names the aggregate and the
/// command or event kind involved, so a failure can be traced back to the intent
/// that caused it. Storage failures are not represented here; they travel as
/// their own error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// No events exist for the requested aggregate.
    #[error("aggregate {aggregate_id} not found")]
    NotFound { aggregate_id: String },

    /// A create command targeted an aggregate that is no longer unborn.
    #[error("{command} rejected: aggregate {aggregate_id} already exists")]
    AlreadyExists { aggregate_id: String, command: String },

    /// A command targeted an aggregate that is already deleted.
    #[error("{command} rejected: aggregate {aggregate_id} is already deleted")]
    AlreadyDeleted { aggregate_id: String, command: String },

    /// Another writer appended to the stream between load and append.
    #[error(
        "{command} on aggregate {aggregate_id} lost a version race (expected version {expected}, store is at {actual})"
    )]
    VersionConflict {
        aggregate_id: String,
        command: String,
        expected: u64,
        actual: u64,
    },

    /// A command kind this aggregate type does not know.
    #[error("unrecognized command '{kind}' for aggregate {aggregate_id}")]
    UnrecognizedCommand { aggregate_id: String, kind: String },

    /// An event kind this aggregate type does not know.
    #[error("unrecognized event '{kind}' for aggregate {aggregate_id}")]
    UnrecognizedEvent { aggregate_id: String, kind: String },

    /// An event or command was routed to the wrong aggregate instance.
    #[error("{kind} for aggregate {found} cannot be applied to aggregate {expected}")]
    AggregateMismatch {
        expected: String,
        found: String,
        kind: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("cannot (de)serialize '{kind}' for aggregate {aggregate_id}: {reason}")]
    Serialization {
        aggregate_id: String,
        kind: String,
        reason: String,
    },

    /// A command payload failed validation; nothing was produced.
    #[error("{command} rejected for aggregate {aggregate_id}: {reason}")]
    Validation {
        aggregate_id: String,
        command: String,
        reason: String,
    },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(
        aggregate_id: impl ToString,
        command: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            aggregate_id: aggregate_id.to_string(),
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(aggregate_id: impl ToString) -> Self {
        Self::NotFound {
            aggregate_id: aggregate_id.to_string(),
        }
    }

    pub fn already_exists(aggregate_id: impl ToString, command: impl Into<String>) -> Self {
        Self::AlreadyExists {
            aggregate_id: aggregate_id.to_string(),
            command: command.into(),
        }
    }

    pub fn already_deleted(aggregate_id: impl ToString, command: impl Into<String>) -> Self {
        Self::AlreadyDeleted {
            aggregate_id: aggregate_id.to_string(),
            command: command.into(),
        }
    }

    pub fn unrecognized_command(aggregate_id: impl ToString, kind: impl Into<String>) -> Self {
        Self::UnrecognizedCommand {
            aggregate_id: aggregate_id.to_string(),
            kind: kind.into(),
        }
    }

    pub fn unrecognized_event(aggregate_id: impl ToString, kind: impl Into<String>) -> Self {
        Self::UnrecognizedEvent {
            aggregate_id: aggregate_id.to_string(),
            kind: kind.into(),
        }
    }

    pub fn serialization(
        aggregate_id: impl ToString,
        kind: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Serialization {
            aggregate_id: aggregate_id.to_string(),
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` when re-running the whole command from a fresh load may succeed.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_aggregate_and_kind() {
        let err = DomainError::already_deleted("img-1", "vnfs.delete");
        let msg = err.to_string();
        assert!(msg.contains("img-1"));
        assert!(msg.contains("vnfs.delete"));

        let err = DomainError::unrecognized_event("img-1", "vnfs.resized");
        assert!(err.to_string().contains("vnfs.resized"));

        let msg = DomainError::validation("n0042", "node.create", "bad netdev key").to_string();
        assert!(msg.contains("n0042"));
        assert!(msg.contains("node.create"));
        assert!(msg.contains("bad netdev key"));
    }

    #[test]
    fn only_version_conflicts_are_flagged_retryable() {
        let conflict = DomainError::VersionConflict {
            aggregate_id: "img-1".into(),
            command: "vnfs.update".into(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_version_conflict());
        assert!(!DomainError::not_found("img-1").is_version_conflict());
        assert!(DomainError::not_found("img-1").is_not_found());
    }
}
