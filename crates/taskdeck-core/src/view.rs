use std::str::FromStr;

use crate::task::{Status, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(Status),
}

impl FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(StatusFilter::All)
        } else {
            Ok(StatusFilter::Only(s.parse()?))
        }
    }
}

// A task is visible iff the status filter admits it and the query, when
// non-empty, is a case-insensitive substring of its title or description.
// Input order is preserved (newest-first, as the store keeps it).
pub fn visible_tasks(tasks: &[Task], filter: StatusFilter, query: &str) -> Vec<Task> {
    let q = query.to_ascii_lowercase();

    tasks
        .iter()
        .filter(|task| {
            let status_ok = match filter {
                StatusFilter::All => true,
                StatusFilter::Only(status) => task.status == status,
            };
            if !status_ok {
                return false;
            }
            if q.is_empty() {
                return true;
            }

            let title_match = task.title.to_ascii_lowercase().contains(&q);
            let description_match = task
                .description
                .as_deref()
                .map(|description| description.to_ascii_lowercase().contains(&q))
                .unwrap_or(false);
            title_match || description_match
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub todo: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.todo + self.in_progress + self.completed
    }
}

// Totals over the full unfiltered list, independent of search and filter.
pub fn status_counts(tasks: &[Task]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for task in tasks {
        match task.status {
            Status::Todo => counts.todo += 1,
            Status::InProgress => counts.in_progress += 1,
            Status::Completed => counts.completed += 1,
        }
    }
    counts
}
