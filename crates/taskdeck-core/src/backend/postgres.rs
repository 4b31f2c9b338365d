use anyhow::Context;
use async_trait::async_trait;
use fallible_iterator::FallibleIterator;
use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{ChangeFeed, ChangeKind, TableChange, TaskTable};
use crate::task::{Task, TaskCreate, TaskPatch};

const CHANGE_CHANNEL: &str = "taskdeck_task_changes";

const TASK_COLUMNS: &str = "id, title, description, status, priority, owner_id, created_at, updated_at";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    owner_id    UUID NOT NULL,
    title       TEXT NOT NULL,
    description TEXT,
    status      TEXT NOT NULL DEFAULT 'todo',
    priority    TEXT NOT NULL DEFAULT 'medium',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS tasks_owner_created_idx
    ON tasks (owner_id, created_at DESC);

CREATE OR REPLACE FUNCTION taskdeck_notify_change() RETURNS trigger AS $$
BEGIN
    IF TG_OP = 'DELETE' THEN
        PERFORM pg_notify('taskdeck_task_changes', TG_OP || ' ' || OLD.owner_id::text);
    ELSE
        PERFORM pg_notify('taskdeck_task_changes', TG_OP || ' ' || NEW.owner_id::text);
    END IF;
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS tasks_notify ON tasks;
CREATE TRIGGER tasks_notify
    AFTER INSERT OR UPDATE OR DELETE ON tasks
    FOR EACH ROW EXECUTE FUNCTION taskdeck_notify_change();
";

// Hosted backend client. CRUD goes through an r2d2 pool on the blocking
// thread pool; realtime change notifications arrive over a dedicated
// LISTEN connection and fan out on a broadcast channel.
pub struct PostgresTable {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    changes: broadcast::Sender<TableChange>,
}

impl PostgresTable {
    #[instrument(skip(url))]
    pub fn connect(url: &str) -> anyhow::Result<Self> {
        let config: postgres::Config = url.parse().context("invalid backend.url")?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("failed to connect to postgres backend")?;

        {
            let mut client = pool.get().context("failed to check out backend connection")?;
            client
                .batch_execute(SCHEMA_SQL)
                .context("failed to prepare tasks schema")?;
        }
        info!("postgres backend ready");

        let (changes, _rx) = broadcast::channel(64);
        let listener_url = url.to_string();
        let listener_changes = changes.clone();
        std::thread::Builder::new()
            .name("taskdeck-pg-listen".to_string())
            .spawn(move || listen_for_changes(listener_url, listener_changes))
            .context("failed to start change listener thread")?;

        Ok(Self { pool, changes })
    }

    async fn on_pool<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut postgres::Client) -> anyhow::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let mut client = pool.get().context("failed to check out backend connection")?;
            op(&mut client)
        })
        .await
        .context("backend worker panicked")?
    }
}

fn task_from_row(row: &Row) -> anyhow::Result<Task> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: status.parse()?,
        priority: priority.parse()?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TaskTable for PostgresTable {
    #[instrument(skip(self))]
    async fn list(&self, owner_id: Uuid) -> anyhow::Result<Vec<Task>> {
        self.on_pool(move |client| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE owner_id = $1 ORDER BY created_at DESC"
            );
            let rows = client
                .query(sql.as_str(), &[&owner_id])
                .context("failed to list tasks")?;
            let tasks = rows
                .iter()
                .map(task_from_row)
                .collect::<anyhow::Result<Vec<Task>>>()?;
            debug!(count = tasks.len(), "listed tasks");
            Ok(tasks)
        })
        .await
    }

    #[instrument(skip(self, create), fields(title_len = create.title.len()))]
    async fn insert(&self, owner_id: Uuid, create: TaskCreate) -> anyhow::Result<Task> {
        self.on_pool(move |client| {
            let sql = format!(
                "INSERT INTO tasks (owner_id, title, description, priority)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {TASK_COLUMNS}"
            );
            let priority = create.priority.unwrap_or_default();
            let row = client
                .query_one(
                    sql.as_str(),
                    &[
                        &owner_id,
                        &create.title,
                        &create.description,
                        &priority.as_str(),
                    ],
                )
                .context("failed to insert task")?;
            task_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    async fn update(&self, id: Uuid, owner_id: Uuid, patch: TaskPatch) -> anyhow::Result<Task> {
        self.on_pool(move |client| {
            // Only the provided fields make it into the SET clause; the
            // WHERE clause always carries both id and owner.
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

            if let Some(title) = patch.title {
                values.push(Box::new(title));
                sets.push(format!("title = ${}", values.len()));
            }
            if let Some(description) = patch.description {
                values.push(Box::new(description));
                sets.push(format!("description = ${}", values.len()));
            }
            if let Some(status) = patch.status {
                values.push(Box::new(status.as_str()));
                sets.push(format!("status = ${}", values.len()));
            }
            if let Some(priority) = patch.priority {
                values.push(Box::new(priority.as_str()));
                sets.push(format!("priority = ${}", values.len()));
            }
            sets.push("updated_at = now()".to_string());

            values.push(Box::new(id));
            let id_param = values.len();
            values.push(Box::new(owner_id));
            let owner_param = values.len();

            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ${id_param} AND owner_id = ${owner_param} RETURNING {TASK_COLUMNS}",
                sets.join(", ")
            );
            let params: Vec<&(dyn ToSql + Sync)> = values
                .iter()
                .map(|value| value.as_ref() as &(dyn ToSql + Sync))
                .collect();

            let row = client
                .query_opt(sql.as_str(), &params)
                .context("failed to update task")?
                .ok_or_else(|| anyhow::anyhow!("task not found: {id}"))?;
            task_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<()> {
        self.on_pool(move |client| {
            let deleted = client
                .execute(
                    "DELETE FROM tasks WHERE id = $1 AND owner_id = $2",
                    &[&id, &owner_id],
                )
                .context("failed to delete task")?;
            if deleted == 0 {
                return Err(anyhow::anyhow!("task not found: {id}"));
            }
            Ok(())
        })
        .await
    }

    fn subscribe(&self, owner_id: Uuid) -> ChangeFeed {
        ChangeFeed::new(owner_id, self.changes.subscribe())
    }
}

fn parse_notify_payload(payload: &str) -> Option<TableChange> {
    let (op, owner) = payload.split_once(' ')?;
    let kind = match op {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    let owner_id = owner.parse().ok()?;
    Some(TableChange { kind, owner_id })
}

fn listen_for_changes(url: String, changes: broadcast::Sender<TableChange>) {
    let run = || -> anyhow::Result<()> {
        let mut client =
            postgres::Client::connect(&url, NoTls).context("listener failed to connect")?;
        client
            .batch_execute("LISTEN taskdeck_task_changes")
            .context("failed to LISTEN on change channel")?;
        info!(channel = CHANGE_CHANNEL, "listening for remote changes");

        let mut notifications = client.notifications();
        let mut iter = notifications.blocking_iter();
        while let Some(notification) = iter.next().context("notification stream failed")? {
            if notification.channel() != CHANGE_CHANNEL {
                continue;
            }
            match parse_notify_payload(notification.payload()) {
                Some(change) => {
                    debug!(kind = ?change.kind, owner = %change.owner_id, "remote change notification");
                    let _ = changes.send(change);
                }
                None => {
                    warn!(payload = notification.payload(), "unparseable change payload");
                }
            }
        }
        Ok(())
    };

    if let Err(error) = run() {
        warn!(error = %error, "change listener failed");
    }
    // A lost subscription stays lost until the next session change;
    // explicit loads keep working through the pool.
    warn!("change listener stopped; realtime updates unavailable");
}
