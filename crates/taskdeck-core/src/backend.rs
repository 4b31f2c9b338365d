use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::task::{Task, TaskCreate, TaskPatch};

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableChange {
    pub kind: ChangeKind,
    pub owner_id: Uuid,
}

// Remote table capability for the tasks collection. Every request
// carries the owner it is scoped to; the backend enforces the same
// scoping on its side.
#[async_trait]
pub trait TaskTable: Send + Sync {
    async fn list(&self, owner_id: Uuid) -> anyhow::Result<Vec<Task>>;

    async fn insert(&self, owner_id: Uuid, create: TaskCreate) -> anyhow::Result<Task>;

    async fn update(&self, id: Uuid, owner_id: Uuid, patch: TaskPatch) -> anyhow::Result<Task>;

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<()>;

    fn subscribe(&self, owner_id: Uuid) -> ChangeFeed;
}

// Disposable push subscription handle: dropping it unsubscribes. Events
// for other owners are filtered out here so the store only ever reacts to
// rows it can see.
#[derive(Debug)]
pub struct ChangeFeed {
    owner_id: Uuid,
    rx: broadcast::Receiver<TableChange>,
}

impl ChangeFeed {
    pub fn new(owner_id: Uuid, rx: broadcast::Receiver<TableChange>) -> Self {
        Self { owner_id, rx }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    // Next change touching this owner, or None once the backend side of
    // the channel is gone. A lagged receiver is reported as an update:
    // the reaction to any event is a full reload, so dropped events are
    // covered by the one that is delivered.
    pub async fn changed(&mut self) -> Option<TableChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.owner_id == self.owner_id => {
                    trace!(kind = ?change.kind, owner = %change.owner_id, "change feed event");
                    return Some(change);
                }
                Ok(change) => {
                    trace!(owner = %change.owner_id, "skipping change for other owner");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "change feed lagged; coalescing into one event");
                    return Some(TableChange {
                        kind: ChangeKind::Update,
                        owner_id: self.owner_id,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_filters_events_to_its_owner() {
        let (tx, rx) = broadcast::channel(16);
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut feed = ChangeFeed::new(owner, rx);

        tx.send(TableChange {
            kind: ChangeKind::Insert,
            owner_id: stranger,
        })
        .unwrap();
        tx.send(TableChange {
            kind: ChangeKind::Delete,
            owner_id: owner,
        })
        .unwrap();

        let change = feed.changed().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.owner_id, owner);
    }

    #[tokio::test]
    async fn feed_ends_when_backend_is_dropped() {
        let owner = Uuid::new_v4();
        let (tx, rx) = broadcast::channel(16);
        let mut feed = ChangeFeed::new(owner, rx);
        drop(tx);
        assert!(feed.changed().await.is_none());
    }
}
