use lifeboard_core::db::open_store_in_memory;
use lifeboard_core::remote::memory::MemoryHostedService;
use lifeboard_core::remote::spi::{IdentityProviderSpi, TaskStoreSpi};
use lifeboard_core::{
    CredentialVault, DeleteConfirmation, NoticeKind, SessionStatus, SessionStore, TaskDraft,
    TaskGateway, TaskListCache, TaskService, TaskStatus, TASK_LIST_QUERY,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct horse";

struct Rig {
    remote: Arc<MemoryHostedService>,
    session: Arc<SessionStore>,
    service: TaskService,
    cache: TaskListCache,
}

async fn signed_in_rig() -> Rig {
    let remote = Arc::new(MemoryHostedService::new());
    remote.seed_account(EMAIL, PASSWORD, Some("Ada"));

    let vault = CredentialVault::new(open_store_in_memory().unwrap());
    let session = Arc::new(SessionStore::new(
        Arc::clone(&remote) as Arc<dyn IdentityProviderSpi>,
        vault,
    ));
    session.initialize().await;
    session.sign_in(EMAIL, PASSWORD).await.unwrap();

    let gateway = Arc::new(TaskGateway::new(
        Arc::clone(&session),
        Arc::clone(&remote) as Arc<dyn TaskStoreSpi>,
    ));
    let cache = TaskListCache::new();
    let service = TaskService::new(Arc::clone(&session), gateway, cache.clone());
    service.attach().await.unwrap();

    Rig {
        remote,
        session,
        service,
        cache,
    }
}

fn draft(title: &str) -> TaskDraft {
    TaskDraft::new(title)
}

#[tokio::test]
async fn create_lists_the_new_task_after_exactly_one_invalidation() {
    let rig = signed_in_rig().await;

    let created = rig.service.create_task(draft("Buy milk")).await.unwrap();

    assert!(!created.id.is_nil());
    assert_eq!(rig.cache.metrics(TASK_LIST_QUERY).invalidations, 1);

    let views = rig.service.views().await.unwrap();
    assert_eq!(views.all.len(), 1);
    assert_eq!(views.all[0].id, created.id);
    assert_eq!(views.all[0].title, "Buy milk");
    assert_eq!(views.all[0].status, TaskStatus::Todo);
}

#[tokio::test]
async fn blank_title_fails_fast_without_touching_the_network() {
    let rig = signed_in_rig().await;
    rig.remote.set_offline(true);

    let notice = rig.service.create_task(draft("   ")).await.unwrap_err();

    // A network call would have produced a Network notice here.
    assert_eq!(notice.kind, NoticeKind::Validation);
    assert_eq!(rig.remote.task_count(), 0);
}

#[tokio::test]
async fn tags_are_normalized_before_the_store_sees_them() {
    let rig = signed_in_rig().await;

    let mut task_draft = draft("tagged");
    task_draft.tags = vec![
        "home".to_string(),
        "  ".to_string(),
        " home ".to_string(),
        "errand".to_string(),
    ];
    let created = rig.service.create_task(task_draft).await.unwrap();

    assert_eq!(created.tags.len(), 2);
    assert!(created.tags.contains("home"));
    assert!(created.tags.contains("errand"));
}

#[tokio::test]
async fn all_view_is_the_disjoint_union_of_the_partitions() {
    let rig = signed_in_rig().await;

    for index in 0..6 {
        rig.service
            .create_task(draft(&format!("task {index}")))
            .await
            .unwrap();
    }
    let views = rig.service.views().await.unwrap();
    let ids: Vec<Uuid> = views.all.iter().map(|task| task.id).collect();

    // Walk two tasks into InProgress and one all the way to Completed.
    rig.service
        .transition_status(ids[0], TaskStatus::InProgress)
        .await
        .unwrap();
    rig.service
        .transition_status(ids[1], TaskStatus::InProgress)
        .await
        .unwrap();
    rig.service
        .transition_status(ids[1], TaskStatus::Completed)
        .await
        .unwrap();

    let views = rig.service.views().await.unwrap();
    let todo: HashSet<Uuid> = views.todo.iter().map(|t| t.id).collect();
    let in_progress: HashSet<Uuid> = views.in_progress.iter().map(|t| t.id).collect();
    let completed: HashSet<Uuid> = views.completed.iter().map(|t| t.id).collect();
    let all: HashSet<Uuid> = views.all.iter().map(|t| t.id).collect();

    assert!(todo.is_disjoint(&in_progress));
    assert!(todo.is_disjoint(&completed));
    assert!(in_progress.is_disjoint(&completed));

    let union: HashSet<Uuid> = todo
        .union(&in_progress)
        .chain(completed.iter())
        .copied()
        .collect();
    assert_eq!(union, all);

    let counts = rig.service.counts().await.unwrap();
    assert_eq!(counts.all, 6);
    assert_eq!(counts.todo, 4);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.completed, 1);
}

#[tokio::test]
async fn completed_at_is_set_exactly_while_completed() {
    let rig = signed_in_rig().await;
    let task = rig.service.create_task(draft("cycle me")).await.unwrap();

    let task = rig
        .service
        .transition_status(task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(task.completed_at, None);

    let task = rig
        .service
        .transition_status(task.id, TaskStatus::Completed)
        .await
        .unwrap();
    assert!(task.completed_at.is_some());
    assert_eq!(task.status, TaskStatus::Completed);

    let task = rig
        .service
        .transition_status(task.id, TaskStatus::Todo)
        .await
        .unwrap();
    assert_eq!(task.completed_at, None);
    assert_eq!(task.status, TaskStatus::Todo);
}

#[tokio::test]
async fn off_cycle_transitions_are_rejected_locally() {
    let rig = signed_in_rig().await;
    let task = rig.service.create_task(draft("no shortcuts")).await.unwrap();

    let notice = rig
        .service
        .transition_status(task.id, TaskStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(notice.kind, NoticeKind::Policy);

    let views = rig.service.views().await.unwrap();
    assert_eq!(views.all[0].status, TaskStatus::Todo);
}

#[tokio::test]
async fn delete_requires_confirmation_and_reports_already_gone() {
    let rig = signed_in_rig().await;
    let task = rig.service.create_task(draft("expendable")).await.unwrap();

    let notice = rig
        .service
        .delete_task(task.id, DeleteConfirmation::Cancelled)
        .await
        .unwrap_err();
    assert_eq!(notice.kind, NoticeKind::Policy);
    assert_eq!(rig.service.views().await.unwrap().all.len(), 1);

    rig.service
        .delete_task(task.id, DeleteConfirmation::Confirmed)
        .await
        .unwrap();
    assert_eq!(rig.service.views().await.unwrap().all.len(), 0);

    // Idempotence is observable: the second delete is NotFound, not Ok.
    let notice = rig
        .service
        .delete_task(task.id, DeleteConfirmation::Confirmed)
        .await
        .unwrap_err();
    assert_eq!(notice.kind, NoticeKind::NotFound);
}

#[tokio::test]
async fn network_failures_surface_with_a_retry_affordance() {
    let rig = signed_in_rig().await;
    rig.remote.set_offline(true);

    let notice = rig.service.create_task(draft("offline")).await.unwrap_err();
    assert_eq!(notice.kind, NoticeKind::Network);
    assert!(notice.retryable);

    rig.remote.set_offline(false);
    rig.service.create_task(draft("online again")).await.unwrap();
}

#[tokio::test]
async fn revoked_credential_expires_the_session() {
    let rig = signed_in_rig().await;
    rig.remote.set_data_access_revoked(true);

    let notice = rig.service.create_task(draft("doomed")).await.unwrap_err();

    assert_eq!(notice.kind, NoticeKind::Auth);
    // The failure is escalated instead of handled locally: the session is
    // forced back to anonymous so the guard re-routes to sign-in.
    assert_eq!(rig.session.status(), SessionStatus::Anonymous);
    assert!(!rig.session.is_authenticated());
}

#[tokio::test]
async fn views_stay_dormant_while_unauthenticated() {
    let rig = signed_in_rig().await;
    rig.service.create_task(draft("kept")).await.unwrap();

    rig.session.sign_out().await.unwrap();

    // Dormant query: the previous value is held without refetching.
    let views = rig.service.views().await.unwrap();
    assert_eq!(views.all.len(), 1);

    rig.remote.set_offline(true);
    let views = rig.service.views().await.unwrap();
    assert_eq!(views.all.len(), 1);
}

#[tokio::test]
async fn detach_keeps_cached_data_for_the_next_mount() {
    let rig = signed_in_rig().await;
    rig.service.create_task(draft("sticky")).await.unwrap();

    rig.service.detach();
    assert_eq!(rig.cache.subscriber_count(TASK_LIST_QUERY), 0);
    assert!(rig.cache.peek(TASK_LIST_QUERY).is_some());

    rig.service.attach().await.unwrap();
    let views = rig.service.views().await.unwrap();
    assert_eq!(views.all.len(), 1);
}
