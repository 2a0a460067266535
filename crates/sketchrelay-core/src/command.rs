//! Command abstractions.

use uuid::Uuid;

/// Trait that all session commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// The session key this command targets, when it targets an existing
    /// session.
    fn session_key(&self) -> Option<&str>;
}
