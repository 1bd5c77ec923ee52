//! Task feature service.
//!
//! # Responsibility
//! - Derive the status-partitioned task views from one cached list.
//! - Run the create / transition / delete flows end to end: local
//!   validation, gateway call, awaited cache invalidation, user notice.
//!
//! # Invariants
//! - Views are pure derivations of the cached list; there is no per-view
//!   state that could diverge.
//! - `completed_at` is set here when a task enters `Completed` and
//!   explicitly cleared when it leaves; the gateway never clears it.
//! - An `Unauthenticated` failure expires the session instead of being
//!   handled locally.

use crate::cache::query_cache::{InvalidationCause, QueryCache, QueryFetcher};
use crate::clock::now_epoch_ms;
use crate::gateway::task_gateway::{GatewayError, TaskGateway, TaskListFilter};
use crate::model::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus};
use crate::service::notice::UserNotice;
use crate::session::store::SessionStore;
use log::{info, warn};
use std::sync::Arc;

/// Cache key for the current identity's task list.
pub const TASK_LIST_QUERY: &str = "tasks-for-current-identity";

/// Shared cache instance carrying task list results.
pub type TaskListCache = QueryCache<Vec<Task>, GatewayError>;

/// Status-partitioned views derived from one list snapshot.
///
/// `all` carries every task including `Deferred` ones; the three named
/// partitions cover the statuses the UI surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskViews {
    pub all: Vec<Task>,
    pub todo: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub completed: Vec<Task>,
}

/// Per-view cardinalities for tab badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub all: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub completed: usize,
}

/// Explicit confirmation gate for destructive actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteConfirmation {
    Confirmed,
    Cancelled,
}

/// Derives the four views from one snapshot. Pure; recomputed on every
/// underlying list change.
pub fn partition_views(tasks: &[Task]) -> TaskViews {
    let mut views = TaskViews {
        all: tasks.to_vec(),
        ..TaskViews::default()
    };
    for task in tasks {
        match task.status {
            TaskStatus::Todo => views.todo.push(task.clone()),
            TaskStatus::InProgress => views.in_progress.push(task.clone()),
            TaskStatus::Completed => views.completed.push(task.clone()),
            TaskStatus::Deferred => {}
        }
    }
    views
}

/// Task management use cases over the synchronization core.
pub struct TaskService {
    session: Arc<SessionStore>,
    gateway: Arc<TaskGateway>,
    cache: TaskListCache,
}

impl TaskService {
    pub fn new(session: Arc<SessionStore>, gateway: Arc<TaskGateway>, cache: TaskListCache) -> Self {
        Self {
            session,
            gateway,
            cache,
        }
    }

    fn list_fetcher(&self) -> QueryFetcher<Vec<Task>, GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        Arc::new(move || {
            let gateway = Arc::clone(&gateway);
            Box::pin(async move { gateway.list(&TaskListFilter::default()).await })
        })
    }

    /// Registers this service as an observer of the task list query.
    /// Brings the list up to date when a session is already live.
    pub async fn attach(&self) -> Result<(), UserNotice> {
        self.cache
            .subscribe(
                TASK_LIST_QUERY,
                self.list_fetcher(),
                self.session.is_authenticated(),
            )
            .await
            .map(|_| ())
            .map_err(|err| self.escalate(err))
    }

    /// Removes this service's observer registration. Cached data stays
    /// behind for the next mount.
    pub fn detach(&self) {
        self.cache.unsubscribe(TASK_LIST_QUERY);
    }

    /// Current views. Dormant (empty) while no session is authenticated.
    pub async fn views(&self) -> Result<TaskViews, UserNotice> {
        let tasks = self.current_list().await?;
        Ok(partition_views(&tasks))
    }

    /// Tab badge counts derived from the same snapshot as the views.
    pub async fn counts(&self) -> Result<TaskCounts, UserNotice> {
        let views = self.views().await?;
        Ok(TaskCounts {
            all: views.all.len(),
            todo: views.todo.len(),
            in_progress: views.in_progress.len(),
            completed: views.completed.len(),
        })
    }

    /// Creates a task. Title validation fails fast before any remote
    /// call; success invalidates (and refetches) the task list.
    pub async fn create_task(&self, draft: TaskDraft) -> Result<Task, UserNotice> {
        if let Err(err) = draft.validate() {
            warn!("event=task_create module=service status=rejected error={err}");
            return Err(GatewayError::from(err).into());
        }

        let task = self
            .gateway
            .create(&draft)
            .await
            .map_err(|err| self.escalate(err))?;
        self.cache
            .invalidate(TASK_LIST_QUERY, InvalidationCause::Mutation)
            .await;
        info!("event=task_create module=service status=ok id={}", task.id);
        Ok(task)
    }

    /// Moves a task one step along todo -> in-progress -> completed ->
    /// todo. Computes `completed_at` here: stamped on entry, explicitly
    /// cleared on exit.
    pub async fn transition_status(
        &self,
        task_id: TaskId,
        next: TaskStatus,
    ) -> Result<Task, UserNotice> {
        let tasks = self.current_list().await?;
        let Some(current) = tasks.iter().find(|task| task.id == task_id) else {
            return Err(GatewayError::NotFound(task_id).into());
        };

        if current.status.cycle_successor() != Some(next) {
            warn!(
                "event=task_transition module=service status=rejected id={task_id} \
                 from={:?} to={next:?}",
                current.status
            );
            return Err(UserNotice::policy(format!(
                "A task cannot move from {:?} to {next:?}.",
                current.status
            )));
        }

        let completed_at = if next == TaskStatus::Completed {
            Some(Some(now_epoch_ms()))
        } else if current.status == TaskStatus::Completed {
            // Leaving Completed must clear the stamp; the store never
            // does this on its own.
            Some(None)
        } else {
            None
        };

        let patch = TaskPatch {
            status: Some(next),
            completed_at,
            ..Default::default()
        };
        let task = self
            .gateway
            .update(task_id, patch)
            .await
            .map_err(|err| self.escalate(err))?;
        self.cache
            .invalidate(TASK_LIST_QUERY, InvalidationCause::Mutation)
            .await;
        info!(
            "event=task_transition module=service status=ok id={task_id} to={next:?}"
        );
        Ok(task)
    }

    /// Deletes a task after an explicit confirmation. The confirmation
    /// is a UX policy gate, not part of the store contract.
    pub async fn delete_task(
        &self,
        task_id: TaskId,
        confirmation: DeleteConfirmation,
    ) -> Result<(), UserNotice> {
        if confirmation != DeleteConfirmation::Confirmed {
            info!("event=task_delete module=service status=cancelled id={task_id}");
            return Err(UserNotice::policy(
                "Deletion needs confirmation; the task was kept.",
            ));
        }

        self.gateway
            .delete(task_id)
            .await
            .map_err(|err| self.escalate(err))?;
        self.cache
            .invalidate(TASK_LIST_QUERY, InvalidationCause::Mutation)
            .await;
        info!("event=task_delete module=service status=ok id={task_id}");
        Ok(())
    }

    async fn current_list(&self) -> Result<Vec<Task>, UserNotice> {
        let tasks = self
            .cache
            .run(
                TASK_LIST_QUERY,
                self.list_fetcher(),
                self.session.is_authenticated(),
            )
            .await
            .map_err(|err| self.escalate(err))?;
        Ok(tasks.unwrap_or_default())
    }

    /// Routes a gateway failure to its owner: `Unauthenticated` expires
    /// the session to force re-authentication, everything else becomes a
    /// user notice. Nothing is swallowed.
    fn escalate(&self, err: GatewayError) -> UserNotice {
        if err == GatewayError::Unauthenticated {
            self.session.expire_session();
        }
        warn!("event=task_flow module=service status=error error={err}");
        UserNotice::from(err)
    }
}
