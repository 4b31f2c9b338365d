use std::sync::Arc;
use std::time::Duration;

use taskdeck_core::backend::TaskTable;
use taskdeck_core::backend::memory::InMemoryTable;
use taskdeck_core::notice::{self, Notice, NoticeKind};
use taskdeck_core::session::{Identity, Session};
use taskdeck_core::store::TaskStore;
use taskdeck_core::task::{Priority, Status, TaskCreate, TaskPatch};
use taskdeck_core::view::{StatusFilter, status_counts, visible_tasks};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Deck {
    table: Arc<InMemoryTable>,
    session: Session,
    store: TaskStore,
    notices: UnboundedReceiver<Notice>,
}

fn deck() -> Deck {
    deck_on(Arc::new(InMemoryTable::new()), Identity::new(Uuid::new_v4(), "ada@example.com"))
}

fn deck_on(table: Arc<InMemoryTable>, identity: Identity) -> Deck {
    let session = Session::signed_in(identity);
    let (notices, notices_rx) = notice::channel();
    let store = TaskStore::new(table.clone(), session.clone(), notices);
    Deck {
        table,
        session,
        store,
        notices: notices_rx,
    }
}

fn drain(notices: &mut UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn create_then_load_yields_backend_defaults() {
    let mut deck = deck();

    let report = deck
        .store
        .create(TaskCreate {
            title: "Write report".to_string(),
            description: None,
            priority: Some(Priority::High),
        })
        .await
        .unwrap();
    deck.store
        .create(TaskCreate::titled("Quick note"))
        .await
        .unwrap();

    deck.store.load().await.unwrap();
    let tasks = deck.store.tasks();
    assert_eq!(tasks.len(), 2);

    // Newest first: the second create leads the list.
    assert_eq!(tasks[0].title, "Quick note");
    assert_eq!(tasks[0].priority, Priority::Medium);
    assert!(tasks[0].description.is_none());

    assert_eq!(tasks[1].id, report.id);
    assert_eq!(tasks[1].title, "Write report");
    assert_eq!(tasks[1].status, Status::Todo);
    assert_eq!(tasks[1].priority, Priority::High);

    let notices = drain(&mut deck.notices);
    assert_eq!(notices.len(), 2);
    assert!(notices
        .iter()
        .all(|n| n.kind == NoticeKind::Success && n.message == "Task added!"));
}

#[tokio::test]
async fn blank_title_is_rejected_before_any_remote_call() {
    let mut deck = deck();
    let owner = deck.session.current_user().unwrap().id;

    assert!(deck
        .store
        .create(TaskCreate::titled("   "))
        .await
        .is_err());

    assert!(deck.store.tasks().is_empty());
    assert!(deck.table.list(owner).await.unwrap().is_empty());
    assert!(drain(&mut deck.notices).is_empty());
}

#[tokio::test]
async fn update_changes_exactly_the_requested_fields() {
    let deck = deck();
    let task = deck
        .store
        .create(TaskCreate {
            title: "Write report".to_string(),
            description: Some("quarterly numbers".to_string()),
            priority: Some(Priority::High),
        })
        .await
        .unwrap();

    let updated = deck
        .store
        .update(task.id, TaskPatch::status(Status::InProgress))
        .await
        .unwrap();

    assert_eq!(updated.status, Status::InProgress);
    assert_eq!(updated.id, task.id);
    assert_eq!(updated.title, task.title);
    assert_eq!(updated.description, task.description);
    assert_eq!(updated.priority, task.priority);
    assert_eq!(updated.created_at, task.created_at);
    assert!(updated.updated_at >= task.updated_at);

    // The mirror carries the merged record without a reload.
    assert_eq!(deck.store.tasks()[0], updated);
}

#[tokio::test]
async fn remove_then_load_never_returns_the_task() {
    let deck = deck();
    let task = deck
        .store
        .create(TaskCreate::titled("Ephemeral"))
        .await
        .unwrap();

    deck.store.remove(task.id).await.unwrap();
    assert!(deck.store.tasks().is_empty());

    deck.store.load().await.unwrap();
    assert!(!deck.store.tasks().iter().any(|t| t.id == task.id));
}

#[tokio::test]
async fn report_scenario_walks_statuses_and_counts() {
    let deck = deck();
    deck.store
        .create(TaskCreate::titled("Existing chore"))
        .await
        .unwrap();
    let baseline = status_counts(&deck.store.tasks());

    let report = deck
        .store
        .create(TaskCreate {
            title: "Write report".to_string(),
            description: None,
            priority: Some(Priority::High),
        })
        .await
        .unwrap();

    let tasks = deck.store.tasks();
    assert_eq!(tasks[0].id, report.id, "new task lists first");
    assert_eq!(tasks[0].status, Status::Todo);
    assert_eq!(tasks[0].priority, Priority::High);

    let counts = status_counts(&tasks);
    assert_eq!(counts.todo, baseline.todo + 1);

    deck.store
        .update(report.id, TaskPatch::status(Status::InProgress))
        .await
        .unwrap();
    let counts = status_counts(&deck.store.tasks());
    assert_eq!(counts.todo, baseline.todo);
    assert_eq!(counts.in_progress, baseline.in_progress + 1);

    deck.store.remove(report.id).await.unwrap();
    assert_eq!(status_counts(&deck.store.tasks()), baseline);
}

#[tokio::test]
async fn search_scenario_is_case_insensitive() {
    let deck = deck();
    deck.store
        .create(TaskCreate::titled("Buy milk"))
        .await
        .unwrap();
    deck.store
        .create(TaskCreate::titled("Write code"))
        .await
        .unwrap();

    let tasks = deck.store.tasks();
    let lower = visible_tasks(&tasks, StatusFilter::All, "milk");
    assert_eq!(lower.len(), 1);
    assert_eq!(lower[0].title, "Buy milk");
    assert_eq!(visible_tasks(&tasks, StatusFilter::All, "MILK"), lower);
}

#[tokio::test]
async fn failed_update_leaves_mirror_untouched_with_one_notice() {
    let mut deck = deck();
    let task = deck
        .store
        .create(TaskCreate::titled("Stable"))
        .await
        .unwrap();
    drain(&mut deck.notices);

    let before = deck.store.tasks();
    deck.table.fail_next("remote exploded");

    let err = deck
        .store
        .update(task.id, TaskPatch::status(Status::Completed))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "remote exploded");

    assert_eq!(deck.store.tasks(), before);

    let notices = drain(&mut deck.notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Error);
    assert_eq!(notices[0].message, "Could not update task");
}

#[tokio::test]
async fn failed_create_and_load_report_their_own_notices() {
    let mut deck = deck();
    deck.store
        .create(TaskCreate::titled("Survivor"))
        .await
        .unwrap();
    drain(&mut deck.notices);
    let before = deck.store.tasks();

    deck.table.fail_next("insert refused");
    assert!(deck
        .store
        .create(TaskCreate::titled("Doomed"))
        .await
        .is_err());
    assert_eq!(deck.store.tasks(), before);
    let notices = drain(&mut deck.notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Could not create task");

    deck.table.fail_next("list refused");
    assert!(deck.store.load().await.is_err());
    assert_eq!(deck.store.tasks(), before, "mirror survives a failed load");
    let notices = drain(&mut deck.notices);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Could not load your tasks");
}

#[tokio::test]
async fn remote_change_reloads_a_second_store() {
    let table = Arc::new(InMemoryTable::new());
    let identity = Identity::new(Uuid::new_v4(), "ada@example.com");

    let watcher_deck = deck_on(table.clone(), identity.clone());
    let writer_deck = deck_on(table, identity);
    watcher_deck.store.start();

    assert!(eventually(|| !watcher_deck.store.is_loading()).await);

    writer_deck
        .store
        .create(TaskCreate::titled("From the other tab"))
        .await
        .unwrap();

    assert!(
        eventually(|| watcher_deck
            .store
            .tasks()
            .iter()
            .any(|t| t.title == "From the other tab"))
        .await,
        "watcher store should pick up the remote insert"
    );

    writer_deck.store.stop();
    watcher_deck.store.stop();
}

#[tokio::test]
async fn sign_out_clears_and_sign_in_restores() {
    let deck = deck();
    deck.store.start();
    deck.store
        .create(TaskCreate::titled("Persistent"))
        .await
        .unwrap();
    assert!(eventually(|| !deck.store.tasks().is_empty()).await);

    let identity = deck.session.current_user().unwrap();
    deck.session.sign_out();
    assert!(
        eventually(|| deck.store.tasks().is_empty()).await,
        "mirror clears when the owning session ends"
    );

    deck.session.sign_in(identity);
    assert!(
        eventually(|| deck
            .store
            .tasks()
            .iter()
            .any(|t| t.title == "Persistent"))
        .await,
        "mirror reloads for the restored session"
    );

    deck.store.stop();
}

#[tokio::test]
async fn tasks_are_invisible_and_immutable_across_owners() {
    let table = Arc::new(InMemoryTable::new());
    let ada = deck_on(table.clone(), Identity::new(Uuid::new_v4(), "ada@example.com"));
    let mut grace = deck_on(table, Identity::new(Uuid::new_v4(), "grace@example.com"));

    let secret = ada
        .store
        .create(TaskCreate::titled("Ada's secret"))
        .await
        .unwrap();

    grace.store.load().await.unwrap();
    assert!(grace.store.tasks().is_empty());

    assert!(grace
        .store
        .update(secret.id, TaskPatch::status(Status::Completed))
        .await
        .is_err());
    assert!(grace.store.remove(secret.id).await.is_err());

    let notices = drain(&mut grace.notices);
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|n| n.kind == NoticeKind::Error));

    ada.store.load().await.unwrap();
    assert_eq!(ada.store.tasks()[0].status, Status::Todo);
}

#[tokio::test]
async fn operations_require_an_active_session() {
    let table: Arc<InMemoryTable> = Arc::new(InMemoryTable::new());
    let session = Session::new();
    let (notices, mut notices_rx) = notice::channel();
    let store = TaskStore::new(table, session, notices);

    assert!(store.create(TaskCreate::titled("Nobody's")).await.is_err());
    assert!(store
        .update(Uuid::new_v4(), TaskPatch::status(Status::Todo))
        .await
        .is_err());
    assert!(store.remove(Uuid::new_v4()).await.is_err());

    // Loading without a session resets to an empty, settled mirror.
    store.load().await.unwrap();
    assert!(store.tasks().is_empty());
    assert!(!store.is_loading());
    assert!(drain(&mut notices_rx).is_empty());
}
