//! In-memory hosted service implementing every SPI.
//!
//! Backs tests and the smoke CLI with a complete fake of the remote
//! backend: accounts, task rows, and scoped change channels. Mutations on
//! task rows push change events to every live channel, which is how
//! "another device edited your data" scenarios are exercised.

use crate::clock::now_epoch_ms;
use crate::model::identity::{Credential, Identity, IdentityId, Session};
use crate::model::task::{normalize_tags, Task, TaskId, TaskPatch, TaskStatus};
use crate::remote::spi::{
    ChangeFeedSpi, ExternalProvider, FeedChannel, IdentityProviderSpi, NewTaskRecord, TaskStoreSpi,
};
use crate::remote::types::{ChangeEvent, ChangeOp, EntityKind, RemoteError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

const FEED_CHANNEL_CAPACITY: usize = 64;
const CREDENTIAL_TTL_MS: i64 = 60 * 60 * 1000;

/// Channel lifecycle record kept for assertions on open/close ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLifecycle {
    Opened { channel_id: u64, scope: IdentityId },
    Closed { channel_id: u64 },
}

#[derive(Debug)]
struct AccountRecord {
    password: String,
    identity: Identity,
}

#[derive(Debug)]
struct OpenChannel {
    id: u64,
    entity: EntityKind,
    scope: IdentityId,
    sender: mpsc::Sender<ChangeEvent>,
}

#[derive(Debug, Default)]
struct ServiceState {
    offline: bool,
    external_provider_enabled: bool,
    /// Simulated round-trip latency for password sign-in.
    auth_latency_ms: u64,
    /// When set, every task store call fails as unauthorized, as a store
    /// does once a credential is revoked server-side.
    data_access_revoked: bool,
    accounts: BTreeMap<String, AccountRecord>,
    active_refresh_tokens: BTreeMap<String, IdentityId>,
    tasks: BTreeMap<TaskId, Task>,
    channels: Vec<OpenChannel>,
    feed_log: Vec<FeedLifecycle>,
}

/// Complete in-memory stand-in for the hosted data service.
#[derive(Debug, Default)]
pub struct MemoryHostedService {
    state: Mutex<ServiceState>,
    next_channel_id: AtomicU64,
    next_token: AtomicU64,
}

impl MemoryHostedService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().expect("hosted service state lock poisoned")
    }

    /// Simulates losing / regaining network connectivity. While offline
    /// every SPI call fails with a retryable `unavailable` error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Enables the redirect-based external provider (disabled by default,
    /// matching an unconfigured deployment).
    pub fn set_external_provider_enabled(&self, enabled: bool) {
        self.state().external_provider_enabled = enabled;
    }

    pub fn set_auth_latency_ms(&self, latency_ms: u64) {
        self.state().auth_latency_ms = latency_ms;
    }

    /// Makes the task store reject every call as unauthorized, as it
    /// would after a server-side credential revocation.
    pub fn set_data_access_revoked(&self, revoked: bool) {
        self.state().data_access_revoked = revoked;
    }

    /// Registers an account directly, bypassing the confirmation
    /// round-trip. Returns the assigned identity.
    pub fn seed_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            attributes: BTreeMap::new(),
        };
        self.state().accounts.insert(
            email.to_string(),
            AccountRecord {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Pushes a raw event to every live channel, ignoring the channel's
    /// entity and scope. Lets tests exercise the client-side defenses
    /// against a mis-scoped or mis-filtered feed.
    pub fn push_event(&self, event: ChangeEvent) {
        let state = self.state();
        for channel in &state.channels {
            let _ = channel.sender.try_send(event.clone());
        }
    }

    /// Drops every live channel without recording a close, simulating a
    /// transport failure the client did not ask for.
    pub fn sever_channels(&self) {
        self.state().channels.clear();
    }

    pub fn live_channel_count(&self) -> usize {
        self.state().channels.len()
    }

    pub fn feed_log(&self) -> Vec<FeedLifecycle> {
        self.state().feed_log.clone()
    }

    pub fn task_count(&self) -> usize {
        self.state().tasks.len()
    }

    fn issue_session(&self, identity: Identity, state: &mut ServiceState) -> Session {
        let serial = self.next_token.fetch_add(1, Ordering::Relaxed);
        let credential = Credential {
            access_token: format!("access-{serial}"),
            refresh_token: format!("refresh-{serial}"),
            expires_at: now_epoch_ms() + CREDENTIAL_TTL_MS,
        };
        state
            .active_refresh_tokens
            .insert(credential.refresh_token.clone(), identity.id);
        Session {
            identity,
            credential,
        }
    }

    fn notify_task_change(state: &ServiceState, op: ChangeOp, owner: IdentityId) {
        let event = ChangeEvent {
            entity: EntityKind::Task,
            op,
            scope: owner,
        };
        for channel in &state.channels {
            if channel.entity == EntityKind::Task && channel.scope == owner {
                let _ = channel.sender.try_send(event.clone());
            }
        }
    }

    fn check_online(state: &ServiceState) -> Result<(), RemoteError> {
        if state.offline {
            return Err(RemoteError::unavailable("hosted service unreachable"));
        }
        Ok(())
    }

    fn check_data_access(state: &ServiceState) -> Result<(), RemoteError> {
        Self::check_online(state)?;
        if state.data_access_revoked {
            return Err(RemoteError::unauthorized("credential has been revoked"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProviderSpi for MemoryHostedService {
    async fn password_sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        let latency_ms = {
            let state = self.state();
            Self::check_online(&state)?;
            state.auth_latency_ms
        };
        if latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency_ms)).await;
        }

        let mut state = self.state();
        Self::check_online(&state)?;

        let identity = match state.accounts.get(email) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => {
                return Err(RemoteError::rejected(
                    "invalid_credentials",
                    "Invalid login credentials",
                ))
            }
        };
        Ok(self.issue_session(identity, &mut state))
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check_online(&state)?;

        if state.accounts.contains_key(email) {
            return Err(RemoteError::rejected(
                "email_taken",
                "User already registered",
            ));
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            attributes: BTreeMap::new(),
        };
        state.accounts.insert(
            email.to_string(),
            AccountRecord {
                password: password.to_string(),
                identity,
            },
        );
        Ok(())
    }

    async fn recover(&self, credential: &Credential) -> Result<Session, RemoteError> {
        let mut state = self.state();
        Self::check_online(&state)?;

        let identity_id = state
            .active_refresh_tokens
            .get(&credential.refresh_token)
            .copied()
            .ok_or_else(|| RemoteError::unauthorized("refresh token is not active"))?;
        let identity = state
            .accounts
            .values()
            .map(|account| &account.identity)
            .find(|identity| identity.id == identity_id)
            .cloned()
            .ok_or_else(|| RemoteError::unauthorized("account no longer exists"))?;
        Ok(self.issue_session(identity, &mut state))
    }

    async fn begin_external_sign_in(&self, _provider: ExternalProvider) -> Result<(), RemoteError> {
        let state = self.state();
        Self::check_online(&state)?;

        if !state.external_provider_enabled {
            return Err(RemoteError::rejected(
                "validation_failed",
                "provider is not enabled",
            ));
        }
        Ok(())
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        state.active_refresh_tokens.remove(&credential.refresh_token);
        Ok(())
    }
}

#[async_trait]
impl TaskStoreSpi for MemoryHostedService {
    async fn select_tasks(&self, owner: IdentityId) -> Result<Vec<Task>, RemoteError> {
        let state = self.state();
        Self::check_data_access(&state)?;

        let mut rows: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.owner == owner)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_task(
        &self,
        owner: IdentityId,
        record: NewTaskRecord,
    ) -> Result<Task, RemoteError> {
        let mut state = self.state();
        Self::check_data_access(&state)?;

        let task = Task {
            id: Uuid::new_v4(),
            title: record.title,
            description: record.description,
            status: record.status,
            tags: record.tags,
            deadline: record.deadline,
            created_at: now_epoch_ms(),
            completed_at: None,
            owner,
        };
        state.tasks.insert(task.id, task.clone());
        Self::notify_task_change(&state, ChangeOp::Insert, owner);
        Ok(task)
    }

    async fn update_task(
        &self,
        owner: IdentityId,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<Task, RemoteError> {
        let mut state = self.state();
        Self::check_data_access(&state)?;

        let task = match state.tasks.get_mut(&id) {
            Some(task) if task.owner == owner => task,
            _ => return Err(RemoteError::not_found("task does not exist")),
        };

        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(tags) = patch.tags {
            task.tags = normalize_tags(&tags);
        }
        if let Some(deadline) = patch.deadline {
            task.deadline = deadline;
        }
        if let Some(completed_at) = patch.completed_at {
            task.completed_at = completed_at;
        }
        if let Some(status) = patch.status {
            task.status = status;
            // Autopopulate on entering Completed without an explicit stamp;
            // clearing is always the caller's responsibility.
            if status == TaskStatus::Completed && task.completed_at.is_none() {
                task.completed_at = Some(now_epoch_ms());
            }
        }

        let updated = task.clone();
        Self::notify_task_change(&state, ChangeOp::Update, owner);
        Ok(updated)
    }

    async fn delete_task(&self, owner: IdentityId, id: TaskId) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check_data_access(&state)?;

        match state.tasks.get(&id) {
            Some(task) if task.owner == owner => {}
            _ => return Err(RemoteError::not_found("task does not exist")),
        }
        state.tasks.remove(&id);
        Self::notify_task_change(&state, ChangeOp::Delete, owner);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeedSpi for MemoryHostedService {
    async fn open_channel(
        &self,
        entity: EntityKind,
        scope: IdentityId,
    ) -> Result<FeedChannel, RemoteError> {
        let mut state = self.state();
        Self::check_online(&state)?;

        let channel_id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        state.channels.push(OpenChannel {
            id: channel_id,
            entity,
            scope,
            sender,
        });
        state
            .feed_log
            .push(FeedLifecycle::Opened { channel_id, scope });
        Ok(FeedChannel { channel_id, events })
    }

    fn close_channel(&self, channel_id: u64) {
        let mut state = self.state();
        let before = state.channels.len();
        state.channels.retain(|channel| channel.id != channel_id);
        if state.channels.len() != before {
            state.feed_log.push(FeedLifecycle::Closed { channel_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedLifecycle, MemoryHostedService};
    use crate::model::task::{TaskPatch, TaskStatus};
    use crate::remote::spi::{ChangeFeedSpi, IdentityProviderSpi, NewTaskRecord, TaskStoreSpi};
    use crate::remote::types::EntityKind;
    use std::collections::BTreeSet;

    fn draft(title: &str) -> NewTaskRecord {
        NewTaskRecord {
            title: title.to_string(),
            description: String::new(),
            tags: BTreeSet::new(),
            deadline: None,
            status: TaskStatus::Todo,
        }
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let service = MemoryHostedService::new();
        service.seed_account("ada@example.com", "correct", None);

        let err = service
            .password_sign_in("ada@example.com", "wrong")
            .await
            .expect_err("wrong password must fail");
        assert_eq!(err.code, "invalid_credentials");
    }

    #[tokio::test]
    async fn recover_round_trips_a_live_refresh_token() {
        let service = MemoryHostedService::new();
        let identity = service.seed_account("ada@example.com", "pw", Some("Ada"));

        let session = service
            .password_sign_in("ada@example.com", "pw")
            .await
            .expect("sign in");
        let recovered = service
            .recover(&session.credential)
            .await
            .expect("recover from refresh token");
        assert_eq!(recovered.identity.id, identity.id);
    }

    #[tokio::test]
    async fn select_is_scoped_to_the_owner() {
        let service = MemoryHostedService::new();
        let ada = service.seed_account("ada@example.com", "pw", None);
        let eve = service.seed_account("eve@example.com", "pw", None);

        service.insert_task(ada.id, draft("ada's")).await.expect("insert");
        service.insert_task(eve.id, draft("eve's")).await.expect("insert");

        let rows = service.select_tasks(ada.id).await.expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "ada's");
    }

    #[tokio::test]
    async fn update_stamps_completed_at_only_when_missing() {
        let service = MemoryHostedService::new();
        let ada = service.seed_account("ada@example.com", "pw", None);
        let task = service.insert_task(ada.id, draft("t")).await.expect("insert");

        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        let updated = service
            .update_task(ada.id, task.id, patch)
            .await
            .expect("update");
        assert!(updated.completed_at.is_some());

        // Leaving Completed without an explicit clear keeps the old stamp.
        let patch = TaskPatch {
            status: Some(TaskStatus::Todo),
            ..TaskPatch::default()
        };
        let updated = service
            .update_task(ada.id, task.id, patch)
            .await
            .expect("update");
        assert!(updated.completed_at.is_some());
    }

    #[tokio::test]
    async fn close_channel_is_recorded_once() {
        let service = MemoryHostedService::new();
        let ada = service.seed_account("ada@example.com", "pw", None);

        let channel = service
            .open_channel(EntityKind::Task, ada.id)
            .await
            .expect("open channel");
        service.close_channel(channel.channel_id);
        service.close_channel(channel.channel_id);

        let log = service.feed_log();
        assert_eq!(
            log,
            vec![
                FeedLifecycle::Opened {
                    channel_id: channel.channel_id,
                    scope: ada.id
                },
                FeedLifecycle::Closed {
                    channel_id: channel.channel_id
                },
            ]
        );
    }
}
