//! Dependency bookkeeping.
//!
//! `depends_on`/`blocks` are advisory edges between task ids. Nothing here
//! ever blocks a mutation; the mutator only turns incomplete dependencies
//! into warning events.

use serde::Serialize;

use crate::error::Result;
use crate::store::StoreTxn;
use crate::task::{sort_siblings, Task, TaskStatus};

/// A referenced dependency that is not done yet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DependencyRef {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// Dependencies of `task` that resolve to a task whose status is not `done`.
///
/// Unresolvable ids are skipped; the edges are weak references and are not
/// required to resolve.
pub fn incomplete_dependencies<T: StoreTxn>(txn: &T, task: &Task) -> Result<Vec<DependencyRef>> {
    let mut incomplete = Vec::new();
    for dep_id in &task.depends_on {
        let Some(dep) = txn.get(dep_id)? else { continue };
        if dep.status != TaskStatus::Done {
            incomplete.push(DependencyRef {
                id: dep.id,
                title: dep.title,
                status: dep.status,
            });
        }
    }
    Ok(incomplete)
}

/// Every task in the calendar whose `depends_on` names `task_id`.
///
/// Full scan over the calendar; there is no reverse index.
pub fn dependents<T: StoreTxn>(txn: &T, calendar_id: &str, task_id: &str) -> Result<Vec<Task>> {
    let mut found: Vec<Task> = txn
        .by_calendar(calendar_id)?
        .into_iter()
        .filter(|task| task.depends_on.iter().any(|dep| dep == task_id))
        .collect();
    sort_siblings(&mut found);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TaskStore};
    use crate::task::TaskPriority;
    use chrono::Utc;

    fn task(id: &str, status: TaskStatus, depends_on: &[&str]) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            calendar_id: "cal".to_string(),
            title: format!("Task {id}"),
            description: None,
            parent_id: None,
            hierarchy_level: 0,
            hierarchy_path: id.to_string(),
            sort_order: 0,
            status,
            priority: TaskPriority::Medium,
            progress_percentage: 0,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            blocks: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reports_only_unfinished_dependencies() {
        let store = MemoryStore::new();
        store
            .with_transaction(|txn| {
                txn.insert(task("a", TaskStatus::Done, &[]))?;
                txn.insert(task("b", TaskStatus::InProgress, &[]))?;
                txn.insert(task("c", TaskStatus::Todo, &["a", "b", "missing"]))?;
                Ok(())
            })
            .unwrap();

        let incomplete = store
            .with_transaction(|txn| {
                let c = txn.get("c")?.unwrap();
                incomplete_dependencies(txn, &c)
            })
            .unwrap();

        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, "b");
        assert_eq!(incomplete[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn dependents_is_a_reverse_lookup() {
        let store = MemoryStore::new();
        store
            .with_transaction(|txn| {
                txn.insert(task("a", TaskStatus::Todo, &[]))?;
                txn.insert(task("b", TaskStatus::Todo, &["a"]))?;
                txn.insert(task("c", TaskStatus::Todo, &["a", "b"]))?;
                txn.insert(task("d", TaskStatus::Todo, &["b"]))?;
                Ok(())
            })
            .unwrap();

        let found = store
            .with_transaction(|txn| dependents(txn, "cal", "a"))
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
