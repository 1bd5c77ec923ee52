//! Core synchronization layer for Lifeboard.
//! This crate is the single source of truth for session, cache and task
//! mutation invariants.

pub mod cache;
pub mod clock;
pub mod db;
pub mod feed;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod remote;
pub mod service;
pub mod session;

pub use cache::query_cache::{InvalidationCause, QueryCache, QueryFetcher, QueryMetrics};
pub use feed::backoff::FeedBackoff;
pub use feed::subscriber::{ChangeFeedSubscriber, FeedState};
pub use gateway::task_gateway::{GatewayError, TaskGateway, TaskListFilter, TaskOrder};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::identity::{Credential, Identity, IdentityId, Session, SessionStatus};
pub use model::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus};
pub use service::notice::{NoticeKind, UserNotice};
pub use service::task_service::{
    DeleteConfirmation, TaskCounts, TaskListCache, TaskService, TaskViews, TASK_LIST_QUERY,
};
pub use session::store::{AuthError, SessionStore};
pub use session::vault::CredentialVault;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
