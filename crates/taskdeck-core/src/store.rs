use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::TaskTable;
use crate::notice::{Notice, NoticeFeed};
use crate::session::Session;
use crate::task::{Task, TaskCreate, TaskPatch};

// Local mirror of the current user's tasks. All mutations go to the
// backend first; the mirror changes only on confirmed success, except for
// load() which replaces it wholesale. The watcher keeps exactly one
// change subscription per current owner and answers every remote change
// with a full reload (last load wins, no merging).
pub struct TaskStore {
    inner: Arc<StoreInner>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

struct StoreInner {
    table: Arc<dyn TaskTable>,
    session: Session,
    notices: NoticeFeed,
    state: Mutex<BoardState>,
    revision: watch::Sender<u64>,
}

struct BoardState {
    tasks: Vec<Task>,
    loading: bool,
}

impl StoreInner {
    fn mutate<T>(&self, op: impl FnOnce(&mut BoardState) -> T) -> T {
        let mut state = self.state.lock();
        let out = op(&mut state);
        drop(state);
        self.revision.send_modify(|rev| *rev += 1);
        out
    }
}

impl TaskStore {
    pub fn new(table: Arc<dyn TaskTable>, session: Session, notices: NoticeFeed) -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                table,
                session,
                notices,
                state: Mutex::new(BoardState {
                    tasks: Vec::new(),
                    loading: true,
                }),
                revision,
            }),
            watcher: Mutex::new(None),
        }
    }

    // Starts the background watcher: an initial load, plus a reload on
    // every remote change or session switch. Idempotent; the previous
    // watcher is stopped first.
    pub fn start(&self) {
        self.stop();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(watch_changes(inner));
        *self.watcher.lock() = Some(handle);
        debug!("task store watcher started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
            debug!("task store watcher stopped");
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner.state.lock().tasks.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    // Bumped on every local state change; lets a presentation layer
    // re-render without polling.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    #[instrument(skip(self))]
    pub async fn load(&self) -> anyhow::Result<()> {
        load_into(&self.inner).await
    }

    #[instrument(skip(self, create), fields(title_len = create.title.len()))]
    pub async fn create(&self, create: TaskCreate) -> anyhow::Result<Task> {
        if create.title.trim().is_empty() {
            // Local validation failure: rejected before any remote call,
            // and without a notice.
            return Err(anyhow::anyhow!("task title cannot be empty"));
        }
        let user = self
            .inner
            .session
            .current_user()
            .context("no active session")?;

        match self.inner.table.insert(user.id, create).await {
            Ok(task) => {
                self.inner.mutate(|state| state.tasks.insert(0, task.clone()));
                self.inner.notices.push(Notice::success("Task added!"));
                info!(id = %task.id, "task created");
                Ok(task)
            }
            Err(error) => {
                warn!(error = %error, "create failed");
                self.inner.notices.push(Notice::error("Could not create task"));
                Err(error)
            }
        }
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> anyhow::Result<Task> {
        let user = self
            .inner
            .session
            .current_user()
            .context("no active session")?;

        match self.inner.table.update(id, user.id, patch).await {
            Ok(task) => {
                self.inner.mutate(|state| {
                    if let Some(slot) = state.tasks.iter_mut().find(|t| t.id == id) {
                        *slot = task.clone();
                    }
                });
                self.inner.notices.push(Notice::success("Task updated"));
                info!(id = %task.id, status = %task.status, "task updated");
                Ok(task)
            }
            Err(error) => {
                warn!(error = %error, "update failed");
                self.inner.notices.push(Notice::error("Could not update task"));
                Err(error)
            }
        }
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn remove(&self, id: Uuid) -> anyhow::Result<()> {
        let user = self
            .inner
            .session
            .current_user()
            .context("no active session")?;

        match self.inner.table.delete(id, user.id).await {
            Ok(()) => {
                self.inner.mutate(|state| state.tasks.retain(|task| task.id != id));
                self.inner.notices.push(Notice::success("Task deleted"));
                info!("task deleted");
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "delete failed");
                self.inner.notices.push(Notice::error("Could not delete task"));
                Err(error)
            }
        }
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn load_into(inner: &StoreInner) -> anyhow::Result<()> {
    let Some(user) = inner.session.current_user() else {
        inner.mutate(|state| {
            state.tasks.clear();
            state.loading = false;
        });
        debug!("no session; cleared task mirror");
        return Ok(());
    };

    let result = inner.table.list(user.id).await;
    match result {
        Ok(tasks) => {
            debug!(count = tasks.len(), "loaded tasks");
            inner.mutate(|state| {
                state.tasks = tasks;
                state.loading = false;
            });
            Ok(())
        }
        Err(error) => {
            // The mirror is left as-is; only the loading flag settles.
            warn!(error = %error, "load failed");
            inner.mutate(|state| state.loading = false);
            inner
                .notices
                .push(Notice::error("Could not load your tasks"));
            Err(error)
        }
    }
}

enum WatchEvent {
    Session { closed: bool },
    Change(Option<crate::backend::TableChange>),
}

async fn watch_changes(inner: Arc<StoreInner>) {
    let mut session_rx = inner.session.subscribe();

    loop {
        // One subscription per owner; rebinding on the next iteration
        // drops the previous owner's feed before the new one is used.
        let mut feed = inner
            .session
            .current_user()
            .map(|user| inner.table.subscribe(user.id));

        if let Err(error) = load_into(&inner).await {
            warn!(error = %error, "load after session change failed");
        }

        loop {
            let event = match feed.as_mut() {
                Some(active) => {
                    tokio::select! {
                        changed = session_rx.changed() => WatchEvent::Session {
                            closed: changed.is_err(),
                        },
                        change = active.changed() => WatchEvent::Change(change),
                    }
                }
                None => WatchEvent::Session {
                    closed: session_rx.changed().await.is_err(),
                },
            };

            match event {
                WatchEvent::Session { closed: true } => return,
                WatchEvent::Session { closed: false } => break,
                WatchEvent::Change(Some(change)) => {
                    debug!(kind = ?change.kind, "remote change; reloading");
                    if let Err(error) = load_into(&inner).await {
                        warn!(error = %error, "reload after remote change failed");
                    }
                }
                WatchEvent::Change(None) => {
                    warn!("change feed closed; realtime updates paused");
                    feed = None;
                }
            }
        }
    }
}
