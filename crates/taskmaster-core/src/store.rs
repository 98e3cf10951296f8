use std::collections::HashSet;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::datetime::{hours_to_duration, truncate_to_millis};
use crate::storage::KeyValueStorage;
use crate::task::{DEFAULT_CATEGORY, DEFAULT_EXPIRY_HOURS, Priority, Task};
use crate::view::{TaskCounts, ViewQuery, filtered_tasks};

/// Input of [`TaskStore::add_task`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub text: String,
    pub priority: Priority,
    pub category: String,
    pub expiry_hours: f64,
}

impl Default for NewTask {
    fn default() -> Self {
        Self {
            text: String::new(),
            priority: Priority::Medium,
            category: DEFAULT_CATEGORY.to_string(),
            expiry_hours: DEFAULT_EXPIRY_HOURS,
        }
    }
}

impl NewTask {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn expiry_hours(mut self, hours: f64) -> Self {
        self.expiry_hours = hours;
        self
    }
}

/// Ordered task collection persisted under a single storage key.
#[derive(Debug)]
pub struct TaskStore<S> {
    tasks: Vec<Task>,
    storage: S,
    key: String,
}

impl<S: KeyValueStorage> TaskStore<S> {
    /// Restores the collection stored under `key`. Missing data yields an
    /// empty store; unreadable or malformed data is logged and also yields
    /// an empty store.
    #[tracing::instrument(skip(storage))]
    pub fn load(storage: S, key: &str) -> Self {
        let tasks = match read_tasks(&storage, key) {
            Ok(Some(tasks)) => {
                info!(count = tasks.len(), "loaded tasks");
                tasks
            }
            Ok(None) => {
                debug!("no stored tasks; starting empty");
                Vec::new()
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed loading tasks; starting empty");
                Vec::new()
            }
        };

        Self {
            tasks,
            storage,
            key: key.to_string(),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Appends a new task and returns its id, or `None` when the text is
    /// blank or the expiry offset is not a positive number of hours.
    #[tracing::instrument(skip(self, new), fields(priority = %new.priority, category = %new.category))]
    pub fn add_task(&mut self, new: NewTask, now: DateTime<Utc>) -> Option<u64> {
        let expiry = match hours_to_duration(new.expiry_hours) {
            Ok(expiry) => expiry,
            Err(err) => {
                debug!(error = %err, "ignoring add with invalid expiry");
                return None;
            }
        };

        let created_at = truncate_to_millis(now);
        let Some(id) = self.next_id(created_at) else {
            debug!("ids exhausted; ignoring add");
            return None;
        };
        let task = match Task::new(id, &new.text, new.priority, new.category, created_at, expiry) {
            Ok(task) => task,
            Err(err) => {
                debug!(error = %err, "ignoring add");
                return None;
            }
        };

        debug!(id, expires_at = %task.expires_at(), "task added");
        self.tasks.push(task);
        self.persist();
        Some(id)
    }

    /// Toggles completion. Returns false when no task has `id`.
    #[tracing::instrument(skip(self))]
    pub fn complete_task(&mut self, id: u64) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!("no task with id; nothing to toggle");
            return false;
        };
        task.is_complete = !task.is_complete;
        debug!(is_complete = task.is_complete, "toggled completion");
        self.persist();
        true
    }

    /// Removes the task with `id`. Returns false when absent.
    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, id: u64) -> bool {
        let Some(idx) = self.tasks.iter().position(|t| t.id == id) else {
            debug!("no task with id; nothing to delete");
            return false;
        };
        self.tasks.remove(idx);
        self.persist();
        true
    }

    /// Removes every completed task and returns how many went.
    #[tracing::instrument(skip(self))]
    pub fn delete_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.is_complete);
        let removed = before - self.tasks.len();
        info!(before, after = self.tasks.len(), "deleted completed tasks");
        self.persist();
        removed
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_all(&mut self) {
        info!(count = self.tasks.len(), "clearing all tasks");
        self.tasks.clear();
        self.persist();
    }

    /// Refreshes `is_expired` and `time_remaining` for every task against
    /// `now`. Returns how many tasks expired during this call.
    #[tracing::instrument(skip(self))]
    pub fn recompute_expiry(&mut self, now: DateTime<Utc>) -> usize {
        let newly_expired = self
            .tasks
            .iter_mut()
            .map(|task| task.refresh_expiry(now))
            .filter(|flipped| *flipped)
            .count();

        if newly_expired > 0 {
            info!(newly_expired, "tasks expired");
            self.persist();
        }
        newly_expired
    }

    pub fn filtered_tasks(&self, view: &ViewQuery) -> Vec<&Task> {
        filtered_tasks(&self.tasks, view)
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::from_tasks(&self.tasks)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_complete).count()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_pending()).count()
    }

    pub fn expired_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_expired()).count()
    }

    // Millisecond timestamp, bumped past the largest id when two tasks land
    // in the same millisecond or the clock went backwards.
    fn next_id(&self, created_at: DateTime<Utc>) -> Option<u64> {
        let stamp = u64::try_from(created_at.timestamp_millis()).unwrap_or(0);
        match self.tasks.iter().map(|t| t.id).max() {
            Some(max) if max >= stamp => max.checked_add(1),
            _ => Some(stamp),
        }
    }

    fn persist(&mut self) {
        if let Err(err) = write_tasks(&mut self.storage, &self.key, &self.tasks) {
            error!(
                count = self.tasks.len(),
                error = %format!("{err:#}"),
                "failed saving tasks"
            );
        }
    }
}

pub fn serialize_tasks(tasks: &[Task]) -> anyhow::Result<String> {
    serde_json::to_string(tasks).context("failed to serialize tasks")
}

pub fn deserialize_tasks(raw: &str) -> anyhow::Result<Vec<Task>> {
    serde_json::from_str(raw).context("stored tasks are not a valid task array")
}

fn read_tasks<S: KeyValueStorage>(storage: &S, key: &str) -> anyhow::Result<Option<Vec<Task>>> {
    let Some(raw) = storage
        .get(key)
        .with_context(|| format!("failed reading storage key {key}"))?
    else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let tasks = deserialize_tasks(&raw)?;
    check_invariants(&tasks)?;
    Ok(Some(tasks))
}

// Stored content breaking id uniqueness or expiry ordering is treated as
// malformed.
fn check_invariants(tasks: &[Task]) -> anyhow::Result<()> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.id) {
            bail!("duplicate task id {}", task.id);
        }
        if task.expires_at() <= task.created_at() {
            bail!("task {} expires before it was created", task.id);
        }
    }
    Ok(())
}

fn write_tasks<S: KeyValueStorage>(storage: &mut S, key: &str, tasks: &[Task]) -> anyhow::Result<()> {
    let payload = serialize_tasks(tasks)?;
    storage
        .set(key, &payload)
        .with_context(|| format!("failed writing storage key {key}"))
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{NewTask, TaskStore};
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use crate::task::Priority;

    const KEY: &str = "tasks";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 5, 0, 0)
            .single()
            .expect("valid date")
    }

    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("disk on fire"))
        }

        fn set(&mut self, _key: &str, _value: &str) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[test]
    fn ids_stay_unique_within_one_millisecond() {
        let mut store = TaskStore::load(MemoryStorage::new(), KEY);
        let a = store.add_task(NewTask::new("a"), t0()).expect("added");
        let b = store.add_task(NewTask::new("b"), t0()).expect("added");
        let c = store
            .add_task(NewTask::new("c"), t0() - Duration::seconds(5))
            .expect("added");

        assert_eq!(a, u64::try_from(t0().timestamp_millis()).expect("positive"));
        assert_eq!(b, a + 1);
        assert_eq!(c, a + 2);
    }

    #[test]
    fn invalid_expiry_is_ignored() {
        let mut store = TaskStore::load(MemoryStorage::new(), KEY);
        assert_eq!(store.add_task(NewTask::new("x").expiry_hours(0.0), t0()), None);
        assert_eq!(store.add_task(NewTask::new("x").expiry_hours(-3.0), t0()), None);
        assert_eq!(store.add_task(NewTask::new("far").expiry_hours(1e10), t0()), None);
        assert!(store.is_empty());
        assert_eq!(store.storage().get(KEY).expect("get"), None);
    }

    #[test]
    fn exhausted_ids_make_add_a_no_op() {
        let raw = format!(
            r#"[{{"id":{},"task":"last","priority":"low","category":"Home",
                "createdAt":"2026-02-16T05:00:00.000Z","expiresAt":"2026-02-17T05:00:00.000Z",
                "isComplete":false,"isExpired":false,"timeRemaining":"24h 0m"}}]"#,
            u64::MAX
        );
        let mut store = TaskStore::load(MemoryStorage::with_entry(KEY, &raw), KEY);
        assert_eq!(store.len(), 1);

        assert_eq!(store.add_task(NewTask::new("y"), t0()), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(u64::MAX).expect("present").text, "last");
    }

    #[test]
    fn complete_toggles_and_persists() {
        let mut store = TaskStore::load(MemoryStorage::new(), KEY);
        let id = store.add_task(NewTask::new("x"), t0()).expect("added");

        assert!(store.complete_task(id));
        assert!(store.get(id).expect("present").is_complete);
        let saved = store.storage().get(KEY).expect("get").expect("saved");
        assert!(saved.contains("\"isComplete\":true"));

        assert!(store.complete_task(id));
        assert!(!store.get(id).expect("present").is_complete);
        assert!(!store.complete_task(id + 100));
    }

    #[test]
    fn storage_failures_never_escape() {
        let mut store = TaskStore::load(BrokenStorage, KEY);
        assert!(store.is_empty());

        let id = store
            .add_task(NewTask::new("still works").priority(Priority::High), t0())
            .expect("added in memory");
        assert_eq!(store.len(), 1);
        assert!(store.delete_task(id));
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_storage_resets_to_empty() {
        let storage = MemoryStorage::with_entry(KEY, "{not json");
        let store = TaskStore::load(storage, KEY);
        assert!(store.is_empty());

        let storage = MemoryStorage::with_entry(KEY, r#"[{"id": 1}]"#);
        let store = TaskStore::load(storage, KEY);
        assert!(store.is_empty());
    }

    fn record(id: u64, created: &str, expires: &str) -> String {
        format!(
            r#"{{"id":{id},"task":"t{id}","priority":"medium","category":"Personal",
                "createdAt":"{created}","expiresAt":"{expires}",
                "isComplete":false,"isExpired":false,"timeRemaining":""}}"#
        )
    }

    #[test]
    fn stored_records_breaking_invariants_reset_to_empty() {
        let created = "2026-02-16T05:00:00.000Z";
        let later = "2026-02-16T06:00:00.000Z";

        let duplicate = format!("[{},{}]", record(7, created, later), record(7, created, later));
        let store = TaskStore::load(MemoryStorage::with_entry(KEY, &duplicate), KEY);
        assert!(store.is_empty());

        let backwards = format!("[{}]", record(8, later, created));
        let store = TaskStore::load(MemoryStorage::with_entry(KEY, &backwards), KEY);
        assert!(store.is_empty());

        let same_instant = format!("[{}]", record(9, created, created));
        let store = TaskStore::load(MemoryStorage::with_entry(KEY, &same_instant), KEY);
        assert!(store.is_empty());

        let fine = format!("[{},{}]", record(1, created, later), record(2, created, later));
        let store = TaskStore::load(MemoryStorage::with_entry(KEY, &fine), KEY);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recompute_persists_only_when_something_expires() {
        let mut store = TaskStore::load(MemoryStorage::new(), KEY);
        store
            .add_task(NewTask::new("soon").expiry_hours(1.0), t0())
            .expect("added");

        assert_eq!(store.recompute_expiry(t0() + Duration::minutes(30)), 0);
        assert_eq!(store.recompute_expiry(t0() + Duration::hours(1)), 1);
        assert_eq!(store.recompute_expiry(t0() + Duration::hours(2)), 0);

        let saved = store.storage().get(KEY).expect("get").expect("saved");
        assert!(saved.contains("\"isExpired\":true"));
        assert!(saved.contains("\"timeRemaining\":\"Expired\""));
    }
}
