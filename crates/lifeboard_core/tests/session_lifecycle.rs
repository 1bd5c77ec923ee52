use lifeboard_core::db::{open_store, open_store_in_memory};
use lifeboard_core::remote::memory::MemoryHostedService;
use lifeboard_core::remote::spi::{ExternalProvider, IdentityProviderSpi};
use lifeboard_core::{AuthError, CredentialVault, SessionStatus, SessionStore};
use std::sync::{Arc, Mutex};

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct horse";

fn store_with(service: &Arc<MemoryHostedService>) -> Arc<SessionStore> {
    let vault = CredentialVault::new(open_store_in_memory().unwrap());
    Arc::new(SessionStore::new(
        Arc::clone(service) as Arc<dyn IdentityProviderSpi>,
        vault,
    ))
}

fn record_statuses(store: &SessionStore) -> Arc<Mutex<Vec<SessionStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.subscribe_to_changes(Box::new(move |snapshot| {
        sink.lock().unwrap().push(snapshot.status);
    }));
    seen
}

#[tokio::test]
async fn initialize_without_bundle_settles_anonymous() {
    let service = Arc::new(MemoryHostedService::new());
    let store = store_with(&service);
    let seen = record_statuses(&store);

    let status = store.initialize().await;

    assert_eq!(status, SessionStatus::Anonymous);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![SessionStatus::Authenticating, SessionStatus::Anonymous]
    );
}

#[tokio::test]
async fn sign_in_notifies_each_transition_in_order() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, Some("Ada"));
    let store = store_with(&service);
    let seen = record_statuses(&store);

    store.initialize().await;
    let session = store.sign_in(EMAIL, PASSWORD).await.unwrap();

    assert_eq!(session.identity.email, EMAIL);
    assert!(store.is_authenticated());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            SessionStatus::Authenticating,
            SessionStatus::Anonymous,
            SessionStatus::Authenticating,
            SessionStatus::Authenticated,
        ]
    );
}

#[tokio::test]
async fn failed_sign_in_returns_typed_error_and_settles_anonymous() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, None);
    let store = store_with(&service);

    store.initialize().await;
    let err = store.sign_in(EMAIL, "wrong").await.unwrap_err();

    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(store.status(), SessionStatus::Anonymous);
    assert!(store.current_identity().is_none());
}

#[tokio::test]
async fn sign_in_while_offline_reports_network_unavailable() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, None);
    service.set_offline(true);
    let store = store_with(&service);

    store.initialize().await;
    let err = store.sign_in(EMAIL, PASSWORD).await.unwrap_err();

    assert!(matches!(err, AuthError::NetworkUnavailable));
}

#[tokio::test(start_paused = true)]
async fn concurrent_sign_in_fails_fast_with_operation_in_progress() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, None);
    service.set_auth_latency_ms(50);
    let store = store_with(&service);
    store.initialize().await;

    let first = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.sign_in(EMAIL, PASSWORD).await })
    };
    tokio::task::yield_now().await;

    let err = store.sign_in(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::OperationInProgress));

    first.await.unwrap().unwrap();
    assert!(store.is_authenticated());
}

#[tokio::test]
async fn persisted_credential_is_recovered_on_next_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, Some("Ada"));

    {
        let vault = CredentialVault::new(open_store(&path).unwrap());
        let store = Arc::new(SessionStore::new(
            Arc::clone(&service) as Arc<dyn IdentityProviderSpi>,
            vault,
        ));
        store.initialize().await;
        store.sign_in(EMAIL, PASSWORD).await.unwrap();
    }

    // Fresh process: same vault file, same hosted service.
    let vault = CredentialVault::new(open_store(&path).unwrap());
    let store = Arc::new(SessionStore::new(
        Arc::clone(&service) as Arc<dyn IdentityProviderSpi>,
        vault,
    ));
    let status = store.initialize().await;

    assert_eq!(status, SessionStatus::Authenticated);
    assert_eq!(store.current_identity().unwrap().email, EMAIL);
}

#[tokio::test]
async fn sign_out_clears_the_persisted_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, None);

    {
        let vault = CredentialVault::new(open_store(&path).unwrap());
        let store = Arc::new(SessionStore::new(
            Arc::clone(&service) as Arc<dyn IdentityProviderSpi>,
            vault,
        ));
        store.initialize().await;
        store.sign_in(EMAIL, PASSWORD).await.unwrap();
        store.sign_out().await.unwrap();
        assert_eq!(store.status(), SessionStatus::Anonymous);
    }

    let vault = CredentialVault::new(open_store(&path).unwrap());
    let store = Arc::new(SessionStore::new(
        Arc::clone(&service) as Arc<dyn IdentityProviderSpi>,
        vault,
    ));
    assert_eq!(store.initialize().await, SessionStatus::Anonymous);
}

#[tokio::test]
async fn sign_up_then_sign_in_round_trip() {
    let service = Arc::new(MemoryHostedService::new());
    let store = store_with(&service);
    store.initialize().await;

    store
        .sign_up("grace@example.com", "hopper", Some("Grace"))
        .await
        .unwrap();
    // Registration alone never authenticates.
    assert_eq!(store.status(), SessionStatus::Anonymous);

    let session = store.sign_in("grace@example.com", "hopper").await.unwrap();
    assert_eq!(session.identity.display_name.as_deref(), Some("Grace"));
}

#[tokio::test]
async fn duplicate_sign_up_surfaces_the_provider_message() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, None);
    let store = store_with(&service);
    store.initialize().await;

    let err = store.sign_up(EMAIL, "other", None).await.unwrap_err();
    match err {
        AuthError::Provider { message } => assert!(message.contains("already registered")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn misconfigured_external_provider_gets_a_safe_fallback_message() {
    let service = Arc::new(MemoryHostedService::new());
    let store = store_with(&service);
    store.initialize().await;

    let err = store
        .sign_in_with_external_provider(ExternalProvider::Google)
        .await
        .unwrap_err();
    match err {
        AuthError::Provider { message } => {
            assert!(message.contains("not configured"));
            assert!(!message.contains("validation_failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn external_completion_authenticates_through_the_same_channel() {
    let service = Arc::new(MemoryHostedService::new());
    service.seed_account(EMAIL, PASSWORD, Some("Ada"));
    let store = store_with(&service);
    let seen = record_statuses(&store);
    store.initialize().await;

    // The platform adapter finished the redirect flow and hands over the
    // provider-issued session.
    let session = service.password_sign_in(EMAIL, PASSWORD).await.unwrap();
    store.apply_external_session(session).await.unwrap();

    assert!(store.is_authenticated());
    let transitions = seen.lock().unwrap();
    assert_eq!(
        transitions.as_slice(),
        &[
            SessionStatus::Authenticating,
            SessionStatus::Anonymous,
            SessionStatus::Authenticating,
            SessionStatus::Authenticated,
        ]
    );
}
