//! Change feed subscriber.
//!
//! # Responsibility
//! - Follow session transitions: open a scoped channel on sign-in, close
//!   it on sign-out, reconnect with bounded backoff on transport loss.
//! - Translate in-scope task change events into cache invalidations.
//!
//! # Invariants
//! - The channel for the previous identity is closed before a channel
//!   for a new identity opens.
//! - Events outside the connected identity's scope never invalidate
//!   anything.
//! - Teardown runs synchronously inside the session listener, so it
//!   completes before `sign_out()` returns.

use crate::cache::query_cache::InvalidationCause;
use crate::feed::backoff::FeedBackoff;
use crate::model::identity::{IdentityId, SessionStatus};
use crate::remote::spi::ChangeFeedSpi;
use crate::remote::types::{ChangeEvent, EntityKind};
use crate::service::task_service::{TaskListCache, TASK_LIST_QUERY};
use crate::session::store::{ListenerId, SessionStore};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;

/// Connection state surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts are exhausted; manual refresh still works.
    DisconnectedError,
}

/// Observer invoked on every feed state change.
pub type FeedObserver = Box<dyn Fn(FeedState) + Send + Sync>;

/// Handle for removing a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct FeedInner {
    state: FeedState,
    scope: Option<IdentityId>,
    channel_id: Option<u64>,
    driver: Option<JoinHandle<()>>,
    observers: Vec<(ObserverId, FeedObserver)>,
}

/// Keeps the task list cache in step with server-side mutations.
pub struct ChangeFeedSubscriber {
    feed: Arc<dyn ChangeFeedSpi>,
    cache: TaskListCache,
    backoff: FeedBackoff,
    inner: Mutex<FeedInner>,
    next_observer_id: AtomicU64,
}

impl ChangeFeedSubscriber {
    pub fn new(feed: Arc<dyn ChangeFeedSpi>, cache: TaskListCache, backoff: FeedBackoff) -> Self {
        Self {
            feed,
            cache,
            backoff,
            inner: Mutex::new(FeedInner {
                state: FeedState::Disconnected,
                scope: None,
                channel_id: None,
                driver: None,
                observers: Vec::new(),
            }),
            next_observer_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().expect("feed subscriber lock poisoned")
    }

    /// Wires the subscriber to session transitions. The returned id can
    /// be passed to `SessionStore::unsubscribe` at shutdown.
    pub fn attach(self: &Arc<Self>, session: &SessionStore) -> ListenerId {
        let weak: Weak<Self> = Arc::downgrade(self);
        session.subscribe_to_changes(Box::new(move |snapshot| {
            let Some(subscriber) = weak.upgrade() else {
                return;
            };
            match (snapshot.status, &snapshot.identity) {
                (SessionStatus::Authenticated, Some(identity)) => {
                    subscriber.connect(identity.id);
                }
                _ => subscriber.disconnect(),
            }
        }))
    }

    pub fn state(&self) -> FeedState {
        self.lock().state
    }

    pub fn observe(&self, observer: FeedObserver) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.lock().observers.push((id, observer));
        id
    }

    pub fn unobserve(&self, id: ObserverId) {
        self.lock().observers.retain(|(entry, _)| *entry != id);
    }

    /// Opens a channel for `scope`, tearing down any previous one first.
    fn connect(self: &Arc<Self>, scope: IdentityId) {
        let mut inner = self.lock();
        if inner.scope == Some(scope)
            && matches!(inner.state, FeedState::Connecting | FeedState::Connected)
        {
            return;
        }

        self.teardown_locked(&mut inner);
        inner.scope = Some(scope);
        Self::set_state(&mut inner, FeedState::Connecting);

        let subscriber = Arc::clone(self);
        inner.driver = Some(tokio::spawn(async move {
            subscriber.drive(scope).await;
        }));
    }

    /// Closes the active channel and stops the driver. Runs synchronously
    /// so sign-out teardown completes before control returns.
    fn disconnect(&self) {
        let mut inner = self.lock();
        self.teardown_locked(&mut inner);
        inner.scope = None;
        Self::set_state(&mut inner, FeedState::Disconnected);
    }

    fn teardown_locked(&self, inner: &mut FeedInner) {
        if let Some(channel_id) = inner.channel_id.take() {
            self.feed.close_channel(channel_id);
            info!("event=feed_close module=feed status=ok channel_id={channel_id}");
        }
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
    }

    fn set_state(inner: &mut FeedInner, state: FeedState) {
        if inner.state == state {
            return;
        }
        info!(
            "event=feed_state module=feed from={:?} to={:?}",
            inner.state, state
        );
        inner.state = state;
        for (_, observer) in &inner.observers {
            observer(state);
        }
    }

    fn still_wanted(&self, scope: IdentityId) -> bool {
        self.lock().scope == Some(scope)
    }

    /// Connection loop: open the scoped channel, pump events, reconnect
    /// with backoff on transport loss, give up after the attempt cap.
    async fn drive(self: Arc<Self>, scope: IdentityId) {
        let mut attempt: u32 = 0;
        loop {
            if !self.still_wanted(scope) {
                return;
            }

            match self.feed.open_channel(EntityKind::Task, scope).await {
                Ok(mut channel) => {
                    {
                        let mut inner = self.lock();
                        if inner.scope != Some(scope) {
                            // Torn down while the open was in flight.
                            self.feed.close_channel(channel.channel_id);
                            return;
                        }
                        inner.channel_id = Some(channel.channel_id);
                        Self::set_state(&mut inner, FeedState::Connected);
                    }
                    info!(
                        "event=feed_connect module=feed status=ok channel_id={}",
                        channel.channel_id
                    );
                    attempt = 0;

                    while let Some(event) = channel.events.recv().await {
                        self.handle_event(scope, event).await;
                    }

                    let torn_down = {
                        let mut inner = self.lock();
                        if inner.scope != Some(scope)
                            || inner.channel_id != Some(channel.channel_id)
                        {
                            true
                        } else {
                            inner.channel_id = None;
                            Self::set_state(&mut inner, FeedState::Connecting);
                            false
                        }
                    };
                    if torn_down {
                        return;
                    }
                    warn!("event=feed_drop module=feed status=retrying");
                }
                Err(err) => {
                    warn!("event=feed_connect module=feed status=error error={err}");
                    let mut inner = self.lock();
                    if inner.scope != Some(scope) {
                        return;
                    }
                    Self::set_state(&mut inner, FeedState::Connecting);
                }
            }

            attempt += 1;
            if attempt > self.backoff.max_attempts {
                error!(
                    "event=feed_give_up module=feed attempts={} scope={scope}",
                    self.backoff.max_attempts
                );
                let mut inner = self.lock();
                if inner.scope == Some(scope) {
                    Self::set_state(&mut inner, FeedState::DisconnectedError);
                }
                return;
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
        }
    }

    /// Applies one inbound event: in-scope task changes invalidate the
    /// task list; everything else is dropped.
    async fn handle_event(&self, scope: IdentityId, event: ChangeEvent) {
        if event.entity != EntityKind::Task {
            debug!(
                "event=feed_event module=feed status=ignored reason=entity entity={}",
                event.entity.remote_name()
            );
            return;
        }
        if event.scope != scope {
            // A mis-scoped feed must never leak into another tenant's view.
            warn!(
                "event=feed_event module=feed status=ignored reason=scope scope={}",
                event.scope
            );
            return;
        }

        debug!("event=feed_event module=feed status=ok op={:?}", event.op);
        self.cache
            .invalidate(TASK_LIST_QUERY, InvalidationCause::ChangeFeed)
            .await;
    }
}
