//! SPI contracts implemented by hosted-service adapters.
//!
//! # Responsibility
//! - Define the object-safe boundary between the synchronization core and
//!   a concrete hosted backend.
//!
//! # Invariants
//! - Implementations never return data outside the identity scope they
//!   were called with.
//! - `close_channel` is synchronous so session teardown can run to
//!   completion before control returns to the caller.

use crate::model::identity::{Credential, IdentityId, Session};
use crate::model::task::{Task, TaskId, TaskPatch, TaskStatus};
use crate::remote::types::{ChangeEvent, EntityKind, RemoteError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// External identity providers reachable through a redirect flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalProvider {
    Google,
}

impl ExternalProvider {
    pub fn name(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

/// Identity provider operations.
#[async_trait]
pub trait IdentityProviderSpi: Send + Sync {
    /// Validates an email/password pair and issues a fresh session.
    async fn password_sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError>;

    /// Registers a new account. Success does not authenticate; the
    /// confirmation round-trip happens out-of-band.
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<(), RemoteError>;

    /// Exchanges a persisted credential bundle for a live session.
    async fn recover(&self, credential: &Credential) -> Result<Session, RemoteError>;

    /// Starts a redirect-based external sign-in. Only initiation failures
    /// are reported here; completion arrives through the platform adapter.
    async fn begin_external_sign_in(&self, provider: ExternalProvider) -> Result<(), RemoteError>;

    /// Invalidates the credential server-side.
    async fn revoke(&self, credential: &Credential) -> Result<(), RemoteError>;
}

/// Row shape for inserting a task; the server assigns id, created_at and
/// owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRecord {
    pub title: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub deadline: Option<i64>,
    pub status: TaskStatus,
}

/// Remote task store operations, always scoped to one owner identity.
#[async_trait]
pub trait TaskStoreSpi: Send + Sync {
    async fn select_tasks(&self, owner: IdentityId) -> Result<Vec<Task>, RemoteError>;

    async fn insert_task(&self, owner: IdentityId, record: NewTaskRecord)
        -> Result<Task, RemoteError>;

    /// Applies a partial update. When the patch sets status to `Completed`
    /// without an explicit `completed_at`, the store stamps "now". The
    /// store never clears `completed_at` on its own.
    async fn update_task(
        &self,
        owner: IdentityId,
        id: TaskId,
        patch: TaskPatch,
    ) -> Result<Task, RemoteError>;

    async fn delete_task(&self, owner: IdentityId, id: TaskId) -> Result<(), RemoteError>;
}

/// Live change-notification channel for one (entity kind, identity) pair.
#[derive(Debug)]
pub struct FeedChannel {
    /// Handle used to close the channel through the SPI.
    pub channel_id: u64,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Change feed operations.
#[async_trait]
pub trait ChangeFeedSpi: Send + Sync {
    /// Opens one scoped channel. At most one channel per (entity, identity)
    /// pair is expected to be live from a single client process.
    async fn open_channel(
        &self,
        entity: EntityKind,
        scope: IdentityId,
    ) -> Result<FeedChannel, RemoteError>;

    /// Closes a channel previously returned by `open_channel`. Closing is
    /// the only acknowledgement the protocol has; there is no per-message
    /// ack.
    fn close_channel(&self, channel_id: u64);
}
