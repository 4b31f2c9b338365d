use anyhow::anyhow;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument};

use crate::cli::Command;
use crate::notice::Notice;
use crate::render::{Renderer, short_id};
use crate::store::TaskStore;
use crate::task::{Priority, Status, Task, TaskCreate, TaskPatch};
use crate::view::{StatusFilter, status_counts, visible_tasks};

#[instrument(skip(store, renderer, notices, command))]
pub async fn dispatch(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    command: Command,
) -> anyhow::Result<()> {
    // Commands read the mirror, so bring it current first; the watch
    // command keeps it current through the store's own watcher.
    store.load().await?;

    match command {
        Command::Add {
            title,
            description,
            priority,
        } => cmd_add(store, renderer, notices, title, description, priority).await,
        Command::List { status, search } => cmd_list(store, renderer, status, &search).await,
        Command::Show { id } => cmd_show(store, renderer, &id).await,
        Command::Counts => cmd_counts(store, renderer).await,
        Command::Modify {
            id,
            title,
            description,
            clear_description,
            status,
            priority,
        } => {
            let patch = TaskPatch {
                title,
                description: if clear_description {
                    Some(None)
                } else {
                    description.map(Some)
                },
                status,
                priority,
            };
            cmd_modify(store, renderer, notices, &id, patch).await
        }
        Command::Cycle { id } => cmd_cycle(store, renderer, notices, &id).await,
        Command::Done { id } => cmd_done(store, renderer, notices, &id).await,
        Command::Delete { id } => cmd_delete(store, renderer, notices, &id).await,
        Command::Watch { status, search } => {
            cmd_watch(store, renderer, notices, status, &search).await
        }
    }
}

fn drain_notices(renderer: &mut Renderer, notices: &mut UnboundedReceiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        let _ = renderer.print_notice(&notice);
    }
}

// Accepts a full uuid or a unique prefix of the short form shown in the
// task table.
fn resolve_task(store: &TaskStore, raw: &str) -> anyhow::Result<Task> {
    let needle = raw.trim().to_ascii_lowercase().replace('-', "");
    if needle.is_empty() {
        return Err(anyhow!("empty task id"));
    }

    let tasks = store.tasks();
    let mut matches = tasks
        .iter()
        .filter(|task| task.id.simple().to_string().starts_with(&needle));

    let Some(found) = matches.next() else {
        return Err(anyhow!("no matching task: {raw}"));
    };
    if matches.next().is_some() {
        return Err(anyhow!("ambiguous task id: {raw}"));
    }
    Ok(found.clone())
}

#[instrument(skip(store, renderer, notices, description))]
async fn cmd_add(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    title: String,
    description: Option<String>,
    priority: Option<Priority>,
) -> anyhow::Result<()> {
    info!("command add");

    // Same polish as the board's create form: trimmed title, and an
    // empty description stays absent rather than empty.
    let create = TaskCreate {
        title: title.trim().to_string(),
        description: description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        priority,
    };

    let result = store.create(create).await;
    drain_notices(renderer, notices);
    let task = result?;
    println!("Created task {}.", short_id(&task));
    Ok(())
}

#[instrument(skip(store, renderer))]
async fn cmd_list(
    store: &TaskStore,
    renderer: &mut Renderer,
    status: StatusFilter,
    search: &str,
) -> anyhow::Result<()> {
    info!("command list");

    let tasks = store.tasks();
    let visible = visible_tasks(&tasks, status, search);
    debug!(
        total = tasks.len(),
        visible = visible.len(),
        "rendering board"
    );
    renderer.print_task_table(&visible)?;
    Ok(())
}

#[instrument(skip(store, renderer))]
async fn cmd_show(store: &TaskStore, renderer: &mut Renderer, id: &str) -> anyhow::Result<()> {
    info!("command show");

    let task = resolve_task(store, id)?;
    renderer.print_task_info(&task)?;
    Ok(())
}

#[instrument(skip(store, renderer))]
async fn cmd_counts(store: &TaskStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command counts");

    let counts = status_counts(&store.tasks());
    renderer.print_counts(&counts)?;
    Ok(())
}

#[instrument(skip(store, renderer, notices, patch))]
async fn cmd_modify(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    id: &str,
    patch: TaskPatch,
) -> anyhow::Result<()> {
    info!("command modify");

    if patch.is_empty() {
        return Err(anyhow!("nothing to modify; pass at least one field"));
    }

    let task = resolve_task(store, id)?;
    let result = store.update(task.id, patch).await;
    drain_notices(renderer, notices);
    let updated = result?;
    println!("Modified task {}.", short_id(&updated));
    Ok(())
}

#[instrument(skip(store, renderer, notices))]
async fn cmd_cycle(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    id: &str,
) -> anyhow::Result<()> {
    info!("command cycle");

    let task = resolve_task(store, id)?;
    let next = task.status.cycled();
    let result = store.update(task.id, TaskPatch::status(next)).await;
    drain_notices(renderer, notices);
    let updated = result?;
    println!("Task {} is now {}.", short_id(&updated), updated.status);
    Ok(())
}

#[instrument(skip(store, renderer, notices))]
async fn cmd_done(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    id: &str,
) -> anyhow::Result<()> {
    info!("command done");

    let task = resolve_task(store, id)?;
    let result = store
        .update(task.id, TaskPatch::status(Status::Completed))
        .await;
    drain_notices(renderer, notices);
    let updated = result?;
    println!("Completed task {}.", short_id(&updated));
    Ok(())
}

#[instrument(skip(store, renderer, notices))]
async fn cmd_delete(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    id: &str,
) -> anyhow::Result<()> {
    info!("command delete");

    let task = resolve_task(store, id)?;
    let result = store.remove(task.id).await;
    drain_notices(renderer, notices);
    result?;
    println!("Deleted task {}.", short_id(&task));
    Ok(())
}

#[instrument(skip(store, renderer, notices))]
async fn cmd_watch(
    store: &TaskStore,
    renderer: &mut Renderer,
    notices: &mut UnboundedReceiver<Notice>,
    status: StatusFilter,
    search: &str,
) -> anyhow::Result<()> {
    info!("command watch");

    let mut revisions = store.revisions();
    render_board(store, renderer, status, search)?;

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                render_board(store, renderer, status, search)?;
            }
            notice = notices.recv() => {
                match notice {
                    Some(notice) => renderer.print_notice(&notice)?,
                    None => return Ok(()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("watch interrupted");
                return Ok(());
            }
        }
    }
}

fn render_board(
    store: &TaskStore,
    renderer: &mut Renderer,
    status: StatusFilter,
    search: &str,
) -> anyhow::Result<()> {
    let tasks = store.tasks();
    println!();
    renderer.print_task_table(&visible_tasks(&tasks, status, search))?;
    println!();
    renderer.print_counts(&status_counts(&tasks))?;
    Ok(())
}
