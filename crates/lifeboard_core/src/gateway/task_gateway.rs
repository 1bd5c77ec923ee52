//! Task gateway: identity-scoped CRUD over the hosted store SPI.
//!
//! # Responsibility
//! - Validate and normalize outgoing mutations before they reach the
//!   network.
//! - Translate remote error envelopes into typed gateway failures.
//!
//! # Invariants
//! - Every call is scoped to the current session's identity; callers
//!   cannot name a different identity.
//! - Validation failures never produce a remote call.

use crate::model::identity::IdentityId;
use crate::model::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus, TaskValidationError};
use crate::remote::spi::{NewTaskRecord, TaskStoreSpi};
use crate::remote::types::RemoteError;
use crate::session::store::SessionStore;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Typed gateway failures.
///
/// `Clone` so a joined cache fetch can hand the same failure to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Client-detectable problem; nothing was sent to the network.
    Validation(TaskValidationError),
    /// No authenticated session, or the store rejected the credential.
    /// Fatal to the operation; never retried.
    Unauthenticated,
    /// Transport-level failure; safe to retry.
    NetworkUnavailable,
    /// The target task no longer exists.
    NotFound(TaskId),
    /// Store-side rejection that is none of the above.
    Rejected { message: String },
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Unauthenticated => write!(f, "no authenticated session"),
            Self::NetworkUnavailable => write!(f, "task store is unreachable"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Rejected { message } => write!(f, "task store rejected the request: {message}"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for GatewayError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Ordering applied to list results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskOrder {
    /// Newest first; the default view ordering.
    #[default]
    CreatedDesc,
    CreatedAsc,
    /// Soonest deadline first; tasks without a deadline sort last.
    DeadlineAsc,
}

/// List options. The default lists everything, newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskListFilter {
    pub status: Option<TaskStatus>,
    pub order: TaskOrder,
}

/// Stateless façade over the remote task store, scoped to the current
/// session.
pub struct TaskGateway {
    session: Arc<SessionStore>,
    store: Arc<dyn TaskStoreSpi>,
}

impl TaskGateway {
    pub fn new(session: Arc<SessionStore>, store: Arc<dyn TaskStoreSpi>) -> Self {
        Self { session, store }
    }

    fn scope(&self) -> GatewayResult<IdentityId> {
        if !self.session.is_authenticated() {
            return Err(GatewayError::Unauthenticated);
        }
        self.session
            .current_identity()
            .map(|identity| identity.id)
            .ok_or(GatewayError::Unauthenticated)
    }

    /// Lists the current identity's tasks.
    pub async fn list(&self, filter: &TaskListFilter) -> GatewayResult<Vec<Task>> {
        let owner = self.scope()?;
        let mut tasks = self
            .store
            .select_tasks(owner)
            .await
            .map_err(|err| normalize(err, None))?;

        if let Some(status) = filter.status {
            tasks.retain(|task| task.status == status);
        }
        sort_tasks(&mut tasks, filter.order);

        info!(
            "event=task_list module=gateway status=ok count={}",
            tasks.len()
        );
        Ok(tasks)
    }

    /// Creates a task from a validated draft. The store assigns id,
    /// created_at and owner; new tasks start as `Todo`.
    pub async fn create(&self, draft: &TaskDraft) -> GatewayResult<Task> {
        draft.validate()?;
        let owner = self.scope()?;

        let record = NewTaskRecord {
            title: draft.title.clone(),
            description: draft.description.clone(),
            tags: draft.normalized_tags(),
            deadline: draft.deadline,
            status: TaskStatus::Todo,
        };
        let task = self
            .store
            .insert_task(owner, record)
            .await
            .map_err(|err| normalize(err, None))?;

        info!("event=task_create module=gateway status=ok id={}", task.id);
        Ok(task)
    }

    /// Applies a partial update to one task.
    ///
    /// The store stamps `completed_at` when the patch enters `Completed`
    /// without an explicit value; clearing it when leaving `Completed` is
    /// the caller's responsibility.
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> GatewayResult<Task> {
        patch.validate()?;
        let owner = self.scope()?;

        let task = self
            .store
            .update_task(owner, id, patch)
            .await
            .map_err(|err| normalize(err, Some(id)))?;

        info!("event=task_update module=gateway status=ok id={id}");
        Ok(task)
    }

    /// Deletes one task. Deleting an id that no longer exists reports
    /// `NotFound`, so callers can tell "already gone" from "deleted now".
    pub async fn delete(&self, id: TaskId) -> GatewayResult<()> {
        let owner = self.scope()?;

        self.store
            .delete_task(owner, id)
            .await
            .map_err(|err| normalize(err, Some(id)))?;

        info!("event=task_delete module=gateway status=ok id={id}");
        Ok(())
    }
}

fn sort_tasks(tasks: &mut [Task], order: TaskOrder) {
    match order {
        TaskOrder::CreatedDesc => {
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        }
        TaskOrder::CreatedAsc => {
            tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
        TaskOrder::DeadlineAsc => {
            tasks.sort_by(|a, b| match (a.deadline, b.deadline) {
                (Some(da), Some(db)) => da.cmp(&db).then(a.id.cmp(&b.id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)),
            });
        }
    }
}

fn normalize(err: RemoteError, id: Option<TaskId>) -> GatewayError {
    warn!(
        "event=task_remote_error module=gateway code={} retryable={} error={}",
        err.code, err.retryable, err.message
    );
    if err.is_unavailable() {
        return GatewayError::NetworkUnavailable;
    }
    if err.is_unauthorized() {
        return GatewayError::Unauthenticated;
    }
    if err.is_not_found() {
        if let Some(id) = id {
            return GatewayError::NotFound(id);
        }
    }
    GatewayError::Rejected {
        message: err.message,
    }
}

#[cfg(test)]
mod tests {
    use super::{sort_tasks, TaskOrder};
    use crate::model::task::{Task, TaskStatus};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn task(created_at: i64, deadline: Option<i64>) -> Task {
        Task {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            tags: BTreeSet::new(),
            deadline,
            created_at,
            completed_at: None,
            owner: Uuid::new_v4(),
        }
    }

    #[test]
    fn default_order_is_newest_first() {
        let mut tasks = vec![task(1, None), task(3, None), task(2, None)];
        sort_tasks(&mut tasks, TaskOrder::CreatedDesc);
        let created: Vec<i64> = tasks.iter().map(|t| t.created_at).collect();
        assert_eq!(created, vec![3, 2, 1]);
    }

    #[test]
    fn deadline_order_puts_undated_tasks_last() {
        let mut tasks = vec![task(1, None), task(2, Some(500)), task(3, Some(100))];
        sort_tasks(&mut tasks, TaskOrder::DeadlineAsc);
        assert_eq!(tasks[0].deadline, Some(100));
        assert_eq!(tasks[1].deadline, Some(500));
        assert_eq!(tasks[2].deadline, None);
    }
}
