use provisioner_core::AggregateId;

/// Coarse intent of a command, independent of the entity type.
///
/// Infrastructure uses it to enforce configurable policies (e.g. whether an
/// update may target a deleted aggregate) without knowing the concrete command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandIntent {
    Create,
    Update,
    Delete,
}

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to change an aggregate. They are
/// **transient** (never persisted) and are turned into zero or more events.
///
/// ## Design Constraints
///
/// Commands must be:
/// - **Cloneable**: Commands are re-issued verbatim when a version conflict is retried
/// - **Send + Sync**: Commands cross thread boundaries
/// - **'static**: Commands don't contain borrowed data
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> &AggregateId;

    /// Stable command kind discriminator (e.g. "vnfs.delete").
    fn command_type(&self) -> &'static str;

    fn intent(&self) -> CommandIntent;
}
