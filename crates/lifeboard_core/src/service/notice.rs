//! User-facing failure notices.
//!
//! The service layer is the last point where a typed failure may become
//! a message; nothing below it produces user-visible text.

use crate::gateway::task_gateway::GatewayError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Category of a surfaced failure, used by the UI to pick affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Validation,
    Network,
    Auth,
    NotFound,
    Rejected,
    /// A policy gate stopped the operation before any remote call.
    Policy,
}

/// One user-facing notice with an optional retry affordance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub kind: NoticeKind,
    pub message: String,
    /// True when retrying the same action may succeed.
    pub retryable: bool,
}

impl UserNotice {
    pub fn new(kind: NoticeKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Policy, message, false)
    }
}

impl Display for UserNotice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for UserNotice {}

impl From<GatewayError> for UserNotice {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Validation(err) => Self::new(NoticeKind::Validation, err.to_string(), false),
            GatewayError::Unauthenticated => Self::new(
                NoticeKind::Auth,
                "Your session has expired. Please sign in again.",
                false,
            ),
            GatewayError::NetworkUnavailable => Self::new(
                NoticeKind::Network,
                "The server is unreachable. Please try again.",
                true,
            ),
            GatewayError::NotFound(_) => Self::new(
                NoticeKind::NotFound,
                "That task no longer exists.",
                false,
            ),
            GatewayError::Rejected { message } => Self::new(NoticeKind::Rejected, message, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NoticeKind, UserNotice};
    use crate::gateway::task_gateway::GatewayError;

    #[test]
    fn only_network_failures_offer_retry() {
        let network = UserNotice::from(GatewayError::NetworkUnavailable);
        assert_eq!(network.kind, NoticeKind::Network);
        assert!(network.retryable);

        let auth = UserNotice::from(GatewayError::Unauthenticated);
        assert_eq!(auth.kind, NoticeKind::Auth);
        assert!(!auth.retryable);
    }
}
