use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::{ChangeFeed, ChangeKind, TableChange, TaskTable};
use crate::task::{Priority, Status, Task, TaskCreate, TaskPatch};

// In-process tasks table: the demo backend and the test double. Rows are
// kept newest-first so list() preserves the backend ordering contract
// even when created_at timestamps collide.
pub struct InMemoryTable {
    state: Mutex<State>,
    changes: broadcast::Sender<TableChange>,
}

#[derive(Default)]
struct State {
    rows: Vec<Task>,
    fail_next: Option<String>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            changes,
        }
    }

    // Arms a single-shot fault: the next data operation fails with this
    // message instead of touching any row. Lets tests and demos simulate
    // a remote error without a real transport.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    fn publish(&self, kind: ChangeKind, owner_id: Uuid) {
        let receivers = self.changes.receiver_count();
        debug!(?kind, owner = %owner_id, receivers, "publishing table change");
        let _ = self.changes.send(TableChange { kind, owner_id });
    }
}

impl Default for InMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn take_armed_failure(state: &mut State) -> anyhow::Result<()> {
    if let Some(message) = state.fail_next.take() {
        return Err(anyhow::anyhow!(message));
    }
    Ok(())
}

fn apply_patch(task: &mut Task, patch: TaskPatch) {
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    task.updated_at = Utc::now();
}

#[async_trait]
impl TaskTable for InMemoryTable {
    #[instrument(skip(self))]
    async fn list(&self, owner_id: Uuid) -> anyhow::Result<Vec<Task>> {
        let mut state = self.state.lock();
        take_armed_failure(&mut state)?;
        let tasks: Vec<Task> = state
            .rows
            .iter()
            .filter(|task| task.owner_id == owner_id)
            .cloned()
            .collect();
        debug!(count = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    #[instrument(skip(self, create), fields(title_len = create.title.len()))]
    async fn insert(&self, owner_id: Uuid, create: TaskCreate) -> anyhow::Result<Task> {
        let task = {
            let mut state = self.state.lock();
            take_armed_failure(&mut state)?;

            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                title: create.title,
                description: create.description,
                status: Status::Todo,
                priority: create.priority.unwrap_or(Priority::Medium),
                owner_id,
                created_at: now,
                updated_at: now,
            };
            state.rows.insert(0, task.clone());
            task
        };

        self.publish(ChangeKind::Insert, owner_id);
        Ok(task)
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    async fn update(&self, id: Uuid, owner_id: Uuid, patch: TaskPatch) -> anyhow::Result<Task> {
        let task = {
            let mut state = self.state.lock();
            take_armed_failure(&mut state)?;

            let task = state
                .rows
                .iter_mut()
                .find(|task| task.id == id && task.owner_id == owner_id)
                .ok_or_else(|| anyhow::anyhow!("task not found: {id}"))?;
            apply_patch(task, patch);
            task.clone()
        };

        self.publish(ChangeKind::Update, owner_id);
        Ok(task)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock();
            take_armed_failure(&mut state)?;

            let idx = state
                .rows
                .iter()
                .position(|task| task.id == id && task.owner_id == owner_id)
                .ok_or_else(|| anyhow::anyhow!("task not found: {id}"))?;
            state.rows.remove(idx);
        }

        self.publish(ChangeKind::Delete, owner_id);
        Ok(())
    }

    fn subscribe(&self, owner_id: Uuid) -> ChangeFeed {
        ChangeFeed::new(owner_id, self.changes.subscribe())
    }
}
