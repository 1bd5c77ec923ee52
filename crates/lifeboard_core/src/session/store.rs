//! Process-wide session store.
//!
//! # Responsibility
//! - Hold the single authoritative session state and mutate it.
//! - Deliver ordered change notifications to dependent components.
//! - Drive credential recovery, interactive sign-in/out and registration
//!   against the identity provider SPI.
//!
//! # Invariants
//! - Status never moves `Anonymous -> Authenticated` without passing
//!   through `Authenticating`.
//! - Listeners observe every logical transition exactly once, in order.
//! - At most one sign-in/sign-out style operation is in flight.
//! - Listeners run synchronously inside the transition and must not call
//!   back into the store.

use crate::model::identity::{Identity, Session, SessionStatus};
use crate::remote::spi::{ExternalProvider, IdentityProviderSpi};
use crate::remote::types::RemoteError;
use crate::session::vault::{CredentialVault, VaultError};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Known identity-provider misconfiguration phrasings. Messages matching
/// one of these are replaced with a stable fallback instead of leaking
/// provider internals to the user.
static PROVIDER_MISCONFIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)provider (is )?not enabled|validation_failed")
        .expect("valid provider misconfiguration regex")
});

const PROVIDER_MISCONFIG_FALLBACK: &str =
    "External sign-in is not configured for this service. Use email and password instead.";

pub type AuthResult<T> = Result<T, AuthError>;

/// Typed authentication failures surfaced by the session store.
#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    NetworkUnavailable,
    Provider { message: String },
    /// Another sign-in/sign-out style operation is already in flight.
    OperationInProgress,
    Vault(VaultError),
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::NetworkUnavailable => write!(f, "identity provider is unreachable"),
            Self::Provider { message } => write!(f, "{message}"),
            Self::OperationInProgress => {
                write!(f, "another authentication operation is in progress")
            }
            Self::Vault(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AuthError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Vault(err) => Some(err),
            _ => None,
        }
    }
}

impl From<VaultError> for AuthError {
    fn from(value: VaultError) -> Self {
        Self::Vault(value)
    }
}

impl From<RemoteError> for AuthError {
    fn from(value: RemoteError) -> Self {
        if value.is_unavailable() {
            return Self::NetworkUnavailable;
        }
        if value.code == "invalid_credentials" {
            return Self::InvalidCredentials;
        }
        Self::Provider {
            message: normalize_provider_message(&value.message),
        }
    }
}

/// Replaces known misconfiguration phrasings with a safe fallback.
fn normalize_provider_message(message: &str) -> String {
    if PROVIDER_MISCONFIG_RE.is_match(message) {
        PROVIDER_MISCONFIG_FALLBACK.to_string()
    } else {
        message.to_string()
    }
}

/// Immutable view of the session state handed to listeners and readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
}

/// Change listener. Invoked synchronously, in registration order, once
/// per logical transition.
pub type SessionListener = Box<dyn Fn(&SessionSnapshot) + Send + Sync>;

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Inner {
    status: SessionStatus,
    session: Option<Session>,
    listeners: Vec<(ListenerId, SessionListener)>,
}

/// The single process-wide session authority.
pub struct SessionStore {
    provider: Arc<dyn IdentityProviderSpi>,
    vault: CredentialVault,
    inner: Mutex<Inner>,
    op_in_flight: AtomicBool,
    next_listener_id: AtomicU64,
}

/// Clears the in-flight flag on every exit path of a guarded operation.
struct OpGuard<'a>(&'a AtomicBool);

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProviderSpi>, vault: CredentialVault) -> Self {
        Self {
            provider,
            vault,
            inner: Mutex::new(Inner {
                status: SessionStatus::Unknown,
                session: None,
                listeners: Vec::new(),
            }),
            op_in_flight: AtomicBool::new(false),
            next_listener_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("session store lock poisoned")
    }

    /// Registers a change listener. The listener also observes the
    /// transitions produced by `initialize()` when registered first.
    pub fn subscribe_to_changes(&self, listener: SessionListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.lock().listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.lock().listeners.retain(|(entry, _)| *entry != id);
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            status: inner.status,
            identity: inner.session.as_ref().map(|s| s.identity.clone()),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.lock().session.as_ref().map(|s| s.identity.clone())
    }

    /// Current credential, readable by the gateway for request scoping.
    pub fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Applies a transition and notifies listeners while holding the
    /// state lock, so notification order always matches transition order.
    /// Suppressed when the resulting state is logically unchanged.
    fn transition(&self, status: SessionStatus, session: Option<Session>) {
        let mut inner = self.lock();
        let same_identity = match (&inner.session, &session) {
            (Some(a), Some(b)) => a.identity.id == b.identity.id,
            (None, None) => true,
            _ => false,
        };
        if inner.status == status && same_identity {
            // Same logical state: no notification, but a rotated
            // credential for the same identity must still be kept.
            inner.session = session;
            return;
        }
        if !inner.status.can_transition_to(status) {
            warn!(
                "event=session_transition module=session status=rejected from={:?} to={:?}",
                inner.status, status
            );
            return;
        }

        info!(
            "event=session_transition module=session status=ok from={:?} to={:?}",
            inner.status, status
        );
        inner.status = status;
        inner.session = session;

        let snapshot = SessionSnapshot {
            status: inner.status,
            identity: inner.session.as_ref().map(|s| s.identity.clone()),
        };
        for (_, listener) in &inner.listeners {
            listener(&snapshot);
        }
    }

    fn begin_op(&self) -> AuthResult<OpGuard<'_>> {
        if self.op_in_flight.swap(true, Ordering::SeqCst) {
            return Err(AuthError::OperationInProgress);
        }
        Ok(OpGuard(&self.op_in_flight))
    }

    /// Recovers a persisted credential and settles the session status.
    ///
    /// # Contract
    /// - Status is `Authenticating` for the duration of recovery.
    /// - Status is `Authenticated` or `Anonymous` when the future
    ///   resolves; never `Unknown`.
    /// - Recovery failures are logged and settle as `Anonymous`.
    pub async fn initialize(&self) -> SessionStatus {
        if self.status() != SessionStatus::Unknown {
            warn!("event=session_init module=session status=skipped reason=already_initialized");
            return self.status();
        }

        self.transition(SessionStatus::Authenticating, None);

        let bundle = match self.vault.load_once() {
            Ok(bundle) => bundle,
            Err(err) => {
                error!("event=session_init module=session status=error stage=vault error={err}");
                None
            }
        };

        let Some(persisted) = bundle else {
            info!("event=session_init module=session status=ok outcome=anonymous reason=no_bundle");
            self.transition(SessionStatus::Anonymous, None);
            return SessionStatus::Anonymous;
        };

        match self.provider.recover(&persisted.credential).await {
            Ok(session) => {
                if let Err(err) = self.vault.save(&session) {
                    error!(
                        "event=session_init module=session status=error stage=persist error={err}"
                    );
                }
                info!("event=session_init module=session status=ok outcome=authenticated");
                self.transition(SessionStatus::Authenticated, Some(session));
                SessionStatus::Authenticated
            }
            Err(err) => {
                warn!(
                    "event=session_init module=session status=ok outcome=anonymous \
                     reason=recovery_failed error={err}"
                );
                if let Err(err) = self.vault.clear() {
                    error!(
                        "event=session_init module=session status=error stage=clear error={err}"
                    );
                }
                self.transition(SessionStatus::Anonymous, None);
                SessionStatus::Anonymous
            }
        }
    }

    /// Validates credentials against the identity provider.
    ///
    /// On success the store is `Authenticated` and the bundle persisted.
    /// On failure the final status equals the status before the call
    /// (an `Unknown` start settles as `Anonymous`).
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let _guard = self.begin_op()?;
        let prior = self.snapshot();
        let prior_session = self.current_session();

        self.transition(SessionStatus::Authenticating, prior_session.clone());

        match self.provider.password_sign_in(email, password).await {
            Ok(session) => {
                if let Err(err) = self.vault.save(&session) {
                    error!("event=sign_in module=session status=error stage=persist error={err}");
                }
                info!("event=sign_in module=session status=ok");
                self.transition(SessionStatus::Authenticated, Some(session.clone()));
                Ok(session)
            }
            Err(err) => {
                warn!("event=sign_in module=session status=error error={err}");
                self.revert_after_failure(prior.status, prior_session);
                Err(err.into())
            }
        }
    }

    /// Registers a new account. Success does not authenticate: the
    /// provider completes registration out-of-band.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> AuthResult<()> {
        match self.provider.register(email, password, display_name).await {
            Ok(()) => {
                info!("event=sign_up module=session status=ok");
                Ok(())
            }
            Err(err) => {
                warn!("event=sign_up module=session status=error error={err}");
                Err(err.into())
            }
        }
    }

    /// Initiates a redirect-based external sign-in. Only initiation
    /// failures surface here; completion arrives via
    /// `apply_external_session`.
    pub async fn sign_in_with_external_provider(
        &self,
        provider: ExternalProvider,
    ) -> AuthResult<()> {
        let _guard = self.begin_op()?;
        match self.provider.begin_external_sign_in(provider).await {
            Ok(()) => {
                info!(
                    "event=external_sign_in module=session status=started provider={}",
                    provider.name()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=external_sign_in module=session status=error provider={} error={}",
                    provider.name(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Completion hook for the redirect flow, called by the platform
    /// adapter once the external provider hands back a session.
    pub async fn apply_external_session(&self, session: Session) -> AuthResult<()> {
        let _guard = self.begin_op()?;
        if let Err(err) = self.vault.save(&session) {
            error!(
                "event=external_sign_in module=session status=error stage=persist error={err}"
            );
        }
        info!("event=external_sign_in module=session status=ok");
        self.transition(SessionStatus::Authenticating, self.current_session());
        self.transition(SessionStatus::Authenticated, Some(session));
        Ok(())
    }

    /// Clears the credential and settles as `Anonymous`. Dependent
    /// subscriptions are torn down by listeners before this returns.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let _guard = self.begin_op()?;
        let Some(session) = self.current_session() else {
            return Ok(());
        };

        // Best effort: a dead network must not keep the client signed in.
        if let Err(err) = self.provider.revoke(&session.credential).await {
            warn!("event=sign_out module=session status=degraded stage=revoke error={err}");
        }
        if let Err(err) = self.vault.clear() {
            error!("event=sign_out module=session status=error stage=clear error={err}");
        }

        info!("event=sign_out module=session status=ok");
        self.transition(SessionStatus::Anonymous, None);
        Ok(())
    }

    /// Invalidates the local session after a remote `Unauthenticated`
    /// rejection, forcing re-authentication through the normal flow.
    pub fn expire_session(&self) {
        if self.status() != SessionStatus::Authenticated {
            return;
        }
        warn!("event=session_expired module=session status=ok");
        if let Err(err) = self.vault.clear() {
            error!("event=session_expired module=session status=error stage=clear error={err}");
        }
        self.transition(SessionStatus::Anonymous, None);
    }

    fn revert_after_failure(&self, prior: SessionStatus, prior_session: Option<Session>) {
        match prior {
            SessionStatus::Authenticated => {
                self.transition(SessionStatus::Authenticated, prior_session);
            }
            // A failed first sign-in settles the session as anonymous.
            _ => self.transition(SessionStatus::Anonymous, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_provider_message;

    #[test]
    fn misconfiguration_messages_use_the_fallback() {
        for message in [
            "provider is not enabled",
            "OAuth provider not enabled for this project",
            "validation_failed: redirect uri",
        ] {
            let normalized = normalize_provider_message(message);
            assert!(normalized.contains("not configured"), "{message}");
        }
    }

    #[test]
    fn ordinary_provider_messages_pass_through() {
        assert_eq!(
            normalize_provider_message("quota exceeded"),
            "quota exceeded"
        );
    }
}
