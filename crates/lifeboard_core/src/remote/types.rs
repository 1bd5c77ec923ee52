//! Wire-facing types shared by all hosted-service SPIs.

use crate::model::identity::IdentityId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Entity kinds the hosted store synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    File,
    Link,
    SpendingLog,
}

impl EntityKind {
    /// Fixed remote entity name used when scoping calls and channels.
    pub fn remote_name(self) -> &'static str {
        match self {
            Self::Task => "tasks",
            Self::File => "files",
            Self::Link => "links",
            Self::SpendingLog => "spending_logs",
        }
    }
}

/// Mutation kind carried by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Server-pushed data-change notification.
///
/// The payload is deliberately minimal: consumers refetch from the store
/// instead of applying pushed state, so a malformed or stale payload can
/// never corrupt a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    /// Identity whose data changed. Events outside the current session's
    /// identity are dropped by the subscriber.
    pub scope: IdentityId,
}

/// Error envelope returned by every hosted-service SPI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Stable machine-readable code, e.g. `invalid_credentials`.
    pub code: String,
    /// Provider-supplied human-readable message.
    pub message: String,
    /// Whether retrying the same call may succeed.
    pub retryable: bool,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Transport-level failure; safe to retry.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("unavailable", message, true)
    }

    /// Credential absent, expired or rejected; never retried.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message, false)
    }

    /// Target row does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message, false)
    }

    /// Provider rejected the request for a provider-specific reason.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == "unavailable"
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == "unauthorized"
    }

    pub fn is_not_found(&self) -> bool {
        self.code == "not_found"
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote call failed [{}]: {}", self.code, self.message)
    }
}

impl Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::{EntityKind, RemoteError};

    #[test]
    fn remote_names_match_store_tables() {
        assert_eq!(EntityKind::Task.remote_name(), "tasks");
        assert_eq!(EntityKind::SpendingLog.remote_name(), "spending_logs");
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(RemoteError::unavailable("socket closed").retryable);
        assert!(!RemoteError::unauthorized("token expired").retryable);
        assert!(!RemoteError::not_found("no such row").retryable);
    }
}
