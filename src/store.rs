//! Task store boundary.
//!
//! The mutation engine never talks to a concrete backend: it runs inside a
//! [`TaskStore::with_transaction`] closure against the [`StoreTxn`] view.
//! A transaction is all-or-nothing; nothing is visible to other readers
//! until commit, and a failed closure leaves the store untouched.
//!
//! Two backends ship with the crate:
//! - [`MemoryStore`]: in-process map with an optimistic version check at
//!   commit. Two interleaved writers surface `StoreConflict` for the loser,
//!   which the mutator retries with fresh reads.
//! - [`FileStore`]: one JSON snapshot per data directory, an exclusive flock
//!   held for the whole transaction, atomic rename on commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::task::{sort_siblings, Task};

/// Snapshot schema identifier for the file backend.
pub const STORE_SCHEMA_VERSION: &str = "plnr.store.v1";

const STORE_FILE: &str = "tasks.json";
const STORE_LOCK: &str = "tasks.lock";

/// Read view plus staged writes of one transaction.
pub trait StoreTxn {
    /// Load a task by id.
    fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Direct children of `parent_id` (or roots when `None`) within a
    /// calendar, in sibling order. Includes archived tasks; aggregation
    /// filters those itself.
    fn children_of(&self, calendar_id: &str, parent_id: Option<&str>) -> Result<Vec<Task>>;

    /// Every task of a calendar, unordered.
    fn by_calendar(&self, calendar_id: &str) -> Result<Vec<Task>>;

    /// The subtree rooted at `path`: the task with that hierarchy path plus
    /// every task whose path extends it.
    fn subtree(&self, calendar_id: &str, path: &str) -> Result<Vec<Task>>;

    /// Stage a new task. Fails with `ValidationFailed` when the id is taken.
    fn insert(&mut self, task: Task) -> Result<()>;

    /// Stage an update to an existing task.
    fn put(&mut self, task: Task) -> Result<()>;

    /// Stage a removal.
    fn remove(&mut self, id: &str) -> Result<()>;
}

/// A transactional task store. Constructed once at startup and passed into
/// the engine explicitly; there is no global handle.
pub trait TaskStore {
    type Txn: StoreTxn;

    /// Run `f` inside a transaction. Commit iff `f` returns `Ok`.
    fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T>;
}

// Shared by both backends: a plain map of tasks keyed by id.
fn txn_get(tasks: &HashMap<String, Task>, id: &str) -> Option<Task> {
    tasks.get(id).cloned()
}

fn txn_children(
    tasks: &HashMap<String, Task>,
    calendar_id: &str,
    parent_id: Option<&str>,
) -> Vec<Task> {
    let mut children: Vec<Task> = tasks
        .values()
        .filter(|task| task.calendar_id == calendar_id && task.parent_id.as_deref() == parent_id)
        .cloned()
        .collect();
    sort_siblings(&mut children);
    children
}

fn txn_by_calendar(tasks: &HashMap<String, Task>, calendar_id: &str) -> Vec<Task> {
    tasks
        .values()
        .filter(|task| task.calendar_id == calendar_id)
        .cloned()
        .collect()
}

fn txn_subtree(tasks: &HashMap<String, Task>, calendar_id: &str, path: &str) -> Vec<Task> {
    tasks
        .values()
        .filter(|task| {
            task.calendar_id == calendar_id && crate::task::path_within(path, &task.hierarchy_path)
        })
        .cloned()
        .collect()
}

/// Working copy of the store contents during one transaction.
pub struct MapTxn {
    tasks: HashMap<String, Task>,
}

impl MapTxn {
    fn new(tasks: HashMap<String, Task>) -> Self {
        Self { tasks }
    }

    fn into_tasks(self) -> HashMap<String, Task> {
        self.tasks
    }
}

impl StoreTxn for MapTxn {
    fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(txn_get(&self.tasks, id))
    }

    fn children_of(&self, calendar_id: &str, parent_id: Option<&str>) -> Result<Vec<Task>> {
        Ok(txn_children(&self.tasks, calendar_id, parent_id))
    }

    fn by_calendar(&self, calendar_id: &str) -> Result<Vec<Task>> {
        Ok(txn_by_calendar(&self.tasks, calendar_id))
    }

    fn subtree(&self, calendar_id: &str, path: &str) -> Result<Vec<Task>> {
        Ok(txn_subtree(&self.tasks, calendar_id, path))
    }

    fn insert(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::ValidationFailed(format!(
                "task id already exists: {}",
                task.id
            )));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn put(&mut self, task: Task) -> Result<()> {
        if !self.tasks.contains_key(&task.id) {
            return Err(Error::NotFound(task.id));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        if self.tasks.remove(id).is_none() {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    version: u64,
    tasks: HashMap<String, Task>,
}

/// In-memory store with optimistic commit.
///
/// The transaction works on a clone of the map taken at start; at commit the
/// version recorded at start must still be current, otherwise the commit
/// fails with `StoreConflict` and the caller retries against fresh state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::StoreUnavailable("memory store poisoned".to_string()))
    }
}

impl TaskStore for MemoryStore {
    type Txn = MapTxn;

    fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T>,
    {
        let (start_version, snapshot) = {
            let state = self.lock()?;
            (state.version, state.tasks.clone())
        };

        let mut txn = MapTxn::new(snapshot);
        let value = f(&mut txn)?;

        let mut state = self.lock()?;
        if state.version != start_version {
            return Err(Error::StoreConflict);
        }
        state.tasks = txn.into_tasks();
        state.version += 1;
        Ok(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    schema_version: String,
    tasks: Vec<Task>,
}

impl StoreSnapshot {
    fn empty() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION.to_string(),
            tasks: Vec::new(),
        }
    }
}

/// File-backed store: one JSON snapshot per data directory.
///
/// The flock is held from load to commit, so transactions from concurrent
/// processes are fully serialized rather than optimistically retried.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    lock_timeout_ms: u64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(STORE_LOCK)
    }

    fn load(&self) -> Result<StoreSnapshot> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(StoreSnapshot::empty());
        }
        let data = std::fs::read(&path)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", path.display())))?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&data)?;
        Ok(snapshot)
    }

    fn commit(&self, tasks: &HashMap<String, Task>) -> Result<()> {
        let mut list: Vec<&Task> = tasks.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let snapshot = serde_json::json!({
            "schema_version": STORE_SCHEMA_VERSION,
            "tasks": list,
        });
        let data = serde_json::to_vec_pretty(&snapshot)?;
        lock::write_atomic(self.snapshot_path(), &data)
    }
}

impl TaskStore for FileStore {
    type Txn = MapTxn;

    fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T>,
    {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", self.dir.display())))?;
        let _lock = FileLock::acquire(self.lock_path(), self.lock_timeout_ms)?;

        let snapshot = self.load()?;
        let tasks: HashMap<String, Task> = snapshot
            .tasks
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();

        let mut txn = MapTxn::new(tasks);
        let value = f(&mut txn)?;
        self.commit(&txn.into_tasks())?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn task(id: &str, calendar: &str, parent: Option<&str>, path: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            calendar_id: calendar.to_string(),
            title: id.to_string(),
            description: None,
            parent_id: parent.map(|p| p.to_string()),
            hierarchy_level: path.matches('/').count() as u8,
            hierarchy_path: path.to_string(),
            sort_order: 0,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            progress_percentage: 0,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn memory_transaction_commits_on_ok() {
        let store = MemoryStore::new();
        store
            .with_transaction(|txn| txn.insert(task("a", "cal", None, "a")))
            .unwrap();

        let found = store
            .with_transaction(|txn| txn.get("a"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "a");
    }

    #[test]
    fn memory_transaction_rolls_back_on_err() {
        let store = MemoryStore::new();
        let result: Result<()> = store.with_transaction(|txn| {
            txn.insert(task("a", "cal", None, "a"))?;
            Err(Error::ValidationFailed("boom".to_string()))
        });
        assert!(result.is_err());

        let found = store.with_transaction(|txn| txn.get("a")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn interleaved_writer_gets_store_conflict() {
        let store = MemoryStore::new();
        let inner = store.clone();

        let result: Result<()> = store.with_transaction(|txn| {
            txn.insert(task("outer", "cal", None, "outer"))?;
            // A second writer commits while this transaction is open.
            inner.with_transaction(|inner_txn| inner_txn.insert(task("inner", "cal", None, "inner")))?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::StoreConflict)));

        // Only the inner commit landed.
        let (outer, inner_task) = store
            .with_transaction(|txn| Ok((txn.get("outer")?, txn.get("inner")?)))
            .unwrap();
        assert!(outer.is_none());
        assert!(inner_task.is_some());
    }

    #[test]
    fn subtree_matches_prefix_but_not_similar_ids() {
        let store = MemoryStore::new();
        store
            .with_transaction(|txn| {
                txn.insert(task("a", "cal", None, "a"))?;
                txn.insert(task("b", "cal", Some("a"), "a/b"))?;
                txn.insert(task("bc", "cal", Some("a"), "a/bc"))?;
                txn.insert(task("c", "cal", Some("b"), "a/b/c"))?;
                Ok(())
            })
            .unwrap();

        let subtree = store
            .with_transaction(|txn| txn.subtree("cal", "a/b"))
            .unwrap();
        let mut ids: Vec<String> = subtree.into_iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn children_are_scoped_by_calendar() {
        let store = MemoryStore::new();
        store
            .with_transaction(|txn| {
                txn.insert(task("a", "cal-1", None, "a"))?;
                txn.insert(task("b", "cal-2", None, "b"))?;
                Ok(())
            })
            .unwrap();

        let roots = store
            .with_transaction(|txn| txn.children_of("cal-1", None))
            .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "a");
    }

    #[test]
    fn file_store_round_trips_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store
            .with_transaction(|txn| txn.insert(task("a", "cal", None, "a")))
            .unwrap();

        let reopened = FileStore::new(dir.path());
        let found = reopened
            .with_transaction(|txn| txn.get("a"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "a");
        assert!(dir.path().join("tasks.json").exists());
    }

    #[test]
    fn file_store_failed_transaction_leaves_snapshot_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store
            .with_transaction(|txn| txn.insert(task("a", "cal", None, "a")))
            .unwrap();

        let result: Result<()> = store.with_transaction(|txn| {
            txn.remove("a")?;
            Err(Error::ValidationFailed("abort".to_string()))
        });
        assert!(result.is_err());

        let found = store.with_transaction(|txn| txn.get("a")).unwrap();
        assert!(found.is_some());
    }
}
