use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
    Expired,
}

impl StatusFilter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => task.is_pending(),
            StatusFilter::Completed => task.is_complete,
            StatusFilter::Expired => task.is_expired(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    /// Newest first.
    #[default]
    Created,
    /// Soonest expiry first.
    Expiry,
    /// High, then medium, then low.
    Priority,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortBy::Created => "created",
            SortBy::Expiry => "expiry",
            SortBy::Priority => "priority",
        };
        f.write_str(name)
    }
}

impl FromStr for SortBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(SortBy::Created),
            "expiry" => Ok(SortBy::Expiry),
            "priority" => Ok(SortBy::Priority),
            other => Err(anyhow!("invalid sort order: {other}")),
        }
    }
}

/// Inputs of the derived task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    pub filter: StatusFilter,
    pub query: String,
    pub sort_by: SortBy,
}

impl ViewQuery {
    pub fn new(filter: StatusFilter, query: impl Into<String>, sort_by: SortBy) -> Self {
        Self {
            filter,
            query: query.into(),
            sort_by,
        }
    }
}

/// Filter, then search, then sort. Borrows from `tasks` and never
/// reorders it.
#[tracing::instrument(skip(tasks), fields(total = tasks.len()))]
pub fn filtered_tasks<'a>(tasks: &'a [Task], view: &ViewQuery) -> Vec<&'a Task> {
    let needle = view.query.trim().to_lowercase();

    let mut out: Vec<&Task> = tasks
        .iter()
        .filter(|task| view.filter.matches(task))
        .filter(|task| needle.is_empty() || matches_search(task, &needle))
        .collect();

    match view.sort_by {
        SortBy::Created => out.sort_by(|a, b| b.created_at().cmp(&a.created_at())),
        SortBy::Expiry => out.sort_by_key(|task| task.expires_at()),
        SortBy::Priority => out.sort_by_key(|task| task.priority.rank()),
    }

    trace!(matched = out.len(), "computed task view");
    out
}

fn matches_search(task: &Task, needle: &str) -> bool {
    task.text.to_lowercase().contains(needle) || task.category.to_lowercase().contains(needle)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub expired: usize,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self {
            total: tasks.len(),
            completed: tasks.iter().filter(|t| t.is_complete).count(),
            pending: tasks.iter().filter(|t| t.is_pending()).count(),
            expired: tasks.iter().filter(|t| t.is_expired()).count(),
        }
    }
}
