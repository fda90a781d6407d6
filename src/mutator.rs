//! The task mutation engine.
//!
//! One engine, many transports: every entry point (CLI, push channel, tests)
//! builds a command and lands here. Each operation validates first, then runs
//! inside a single store transaction, re-aggregates the touched ancestor
//! chains, and returns the ordered change events for fan-out. `StoreConflict`
//! is the only error retried internally; everything else surfaces unchanged
//! with the transaction rolled back.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::deps;
use crate::error::{Error, Result};
use crate::hierarchy::{self, DEFAULT_MAX_DEPTH};
use crate::notify::{ChangeEvent, ChangeKind};
use crate::progress::{self, AggregationChange};
use crate::store::{StoreTxn, TaskStore};
use crate::task::{
    sort_siblings, validate_progress, validate_title, ParentTarget, Task, TaskDraft, TaskPatch,
    TaskStatus, MAX_PROGRESS,
};

/// Default bound on internal `StoreConflict` retries.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Result of one mutation: the primary record(s) plus the ordered events.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub task: Option<Task>,
    pub tasks: Vec<Task>,
    pub events: Vec<ChangeEvent>,
}

/// The mutation engine. Holds the injected store handle; constructed once
/// and shared by every transport adapter.
pub struct TaskMutator<S: TaskStore> {
    store: S,
    max_depth: u8,
    conflict_retries: u32,
}

impl<S: TaskStore> TaskMutator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_depth: DEFAULT_MAX_DEPTH,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u8) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Retry wrapper: a losing optimistic transaction re-runs with fresh reads.
    fn run_txn<T, F>(&self, f: F) -> Result<T>
    where
        F: Fn(&mut S::Txn) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match self.store.with_transaction(|txn| f(txn)) {
                Err(Error::StoreConflict) if attempt < self.conflict_retries => {
                    tracing::debug!(attempt, "store conflict, retrying mutation");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Create a task with a caller-assigned id.
    pub fn create(
        &self,
        calendar_id: &str,
        draft: &TaskDraft,
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        if draft.id.trim().is_empty() {
            return Err(Error::ValidationFailed("task id cannot be empty".to_string()));
        }
        validate_title(&draft.title)?;
        if let Some(progress) = draft.progress_percentage {
            validate_progress(progress)?;
        }

        self.run_txn(|txn| {
            let now = Utc::now();
            if txn.get(&draft.id)?.is_some() {
                return Err(Error::ValidationFailed(format!(
                    "task id already exists: {}",
                    draft.id
                )));
            }

            let parent = match &draft.parent_id {
                Some(parent_id) => Some(load_parent(txn, calendar_id, parent_id)?),
                None => None,
            };
            let placement = hierarchy::compute_hierarchy(parent.as_ref(), &draft.id, self.max_depth)?;

            let mut status = draft.status.unwrap_or_default();
            let mut progress = draft.progress_percentage.unwrap_or(0);
            // Leaf coupling, status wins when both are supplied.
            if status == TaskStatus::Done {
                progress = MAX_PROGRESS;
            } else if progress == MAX_PROGRESS {
                status = TaskStatus::Done;
            }

            let sort_order = match draft.sort_order {
                Some(order) => order,
                None => next_sort_order(txn, calendar_id, draft.parent_id.as_deref())?,
            };

            let task = Task {
                id: draft.id.clone(),
                calendar_id: calendar_id.to_string(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                parent_id: draft.parent_id.clone(),
                hierarchy_level: placement.level,
                hierarchy_path: placement.path,
                sort_order,
                status,
                priority: draft.priority.unwrap_or_default(),
                progress_percentage: progress,
                depends_on: draft.depends_on.clone(),
                blocks: draft.blocks.clone(),
                archived: false,
                created_at: now,
                updated_at: now,
            };
            txn.insert(task.clone())?;
            tracing::debug!(task_id = %task.id, calendar_id, "task created");

            let mut events = vec![ChangeEvent::new(ChangeKind::TaskCreated, calendar_id, &task.id)
                .with_actor(actor_id)
                .with_snapshot(&task)];

            if let Some(parent) = &parent {
                let changes = progress::propagate_upward(txn, &parent.id, self.max_depth, now)?;
                push_progress_events(&mut events, calendar_id, actor_id, &changes, &mut HashSet::new());
            }

            let incomplete = deps::incomplete_dependencies(txn, &task)?;
            if !incomplete.is_empty() {
                events.push(
                    ChangeEvent::new(ChangeKind::DependencyWarning, calendar_id, &task.id)
                        .with_actor(actor_id)
                        .with_dependencies(incomplete),
                );
            }

            Ok(MutationOutcome {
                task: Some(task),
                tasks: Vec::new(),
                events,
            })
        })
    }

    /// Apply a field patch, optionally reparenting the task (which rewrites
    /// the whole subtree's levels and paths).
    pub fn update(
        &self,
        task_id: &str,
        patch: &TaskPatch,
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(progress) = patch.progress_percentage {
            validate_progress(progress)?;
        }

        self.run_txn(|txn| {
            let now = Utc::now();
            let mut task = txn
                .get(task_id)?
                .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
            let calendar_id = task.calendar_id.clone();
            let old_parent = task.parent_id.clone();

            let new_parent_id = match &patch.parent {
                Some(target) => target.as_option().map(|p| p.to_string()),
                None => old_parent.clone(),
            };
            let reparent = new_parent_id != old_parent;

            if reparent {
                self.reparent_subtree(txn, &mut task, new_parent_id.as_deref(), now)?;
            }

            apply_fields(&mut task, patch);
            task.touch(now);
            txn.put(task.clone())?;
            tracing::debug!(task_id = %task.id, reparent, "task updated");

            let mut events = vec![ChangeEvent::new(ChangeKind::TaskUpdated, &calendar_id, &task.id)
                .with_actor(actor_id)
                .with_snapshot(&task)];

            // Re-aggregate the chains the change can affect. Each ancestor
            // appears at most once even when the chains overlap.
            let mut seen = HashSet::new();
            if reparent {
                if let Some(parent_id) = &old_parent {
                    let changes = progress::propagate_upward(txn, parent_id, self.max_depth, now)?;
                    push_progress_events(&mut events, &calendar_id, actor_id, &changes, &mut seen);
                }
            }
            if let Some(parent_id) = &task.parent_id {
                let changes = progress::propagate_upward(txn, parent_id, self.max_depth, now)?;
                push_progress_events(&mut events, &calendar_id, actor_id, &changes, &mut seen);
            }

            if patch.depends_on.is_some() {
                let incomplete = deps::incomplete_dependencies(txn, &task)?;
                if !incomplete.is_empty() {
                    events.push(
                        ChangeEvent::new(ChangeKind::DependencyWarning, &calendar_id, &task.id)
                            .with_actor(actor_id)
                            .with_dependencies(incomplete),
                    );
                }
            }

            Ok(MutationOutcome {
                task: Some(task),
                tasks: Vec::new(),
                events,
            })
        })
    }

    /// Reparent-and-reorder wrapper over `update`; touches nothing else.
    pub fn move_task(
        &self,
        task_id: &str,
        new_parent: Option<&str>,
        new_sort_order: Option<i64>,
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        let patch = TaskPatch {
            parent: Some(match new_parent {
                Some(id) => ParentTarget::Parent(id.to_string()),
                None => ParentTarget::Root,
            }),
            sort_order: new_sort_order,
            ..TaskPatch::default()
        };
        self.update(task_id, &patch, actor_id)
    }

    /// Assign `sort_order = index` for every id in `ordered_ids`, scoped to
    /// one sibling group. Order does not affect progress, so there is no
    /// aggregation.
    pub fn reorder(
        &self,
        calendar_id: &str,
        parent_id: Option<&str>,
        ordered_ids: &[String],
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        let mut unique = HashSet::new();
        for id in ordered_ids {
            if !unique.insert(id.as_str()) {
                return Err(Error::ValidationFailed(format!(
                    "duplicate task id in reorder: {id}"
                )));
            }
        }

        self.run_txn(|txn| {
            let now = Utc::now();
            let group = txn.children_of(calendar_id, parent_id)?;
            let members: HashSet<&str> = group.iter().map(|task| task.id.as_str()).collect();
            let group_name = parent_id.unwrap_or("<root>").to_string();

            for id in ordered_ids {
                if !members.contains(id.as_str()) {
                    return Err(Error::InvalidSiblingSet {
                        task: id.clone(),
                        group: group_name.clone(),
                    });
                }
            }

            let mut events = Vec::new();
            for (index, id) in ordered_ids.iter().enumerate() {
                let mut task = txn
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                let order = index as i64;
                if task.sort_order != order {
                    task.sort_order = order;
                    task.touch(now);
                    txn.put(task.clone())?;
                    events.push(
                        ChangeEvent::new(ChangeKind::TaskUpdated, calendar_id, &task.id)
                            .with_actor(actor_id)
                            .with_snapshot(&task),
                    );
                }
            }

            let mut tasks = txn.children_of(calendar_id, parent_id)?;
            sort_siblings(&mut tasks);

            Ok(MutationOutcome {
                task: None,
                tasks,
                events,
            })
        })
    }

    /// Delete a task. Without `cascade`, children are reparented to the
    /// deleted task's former parent one level up; with it, the whole subtree
    /// goes.
    pub fn delete(
        &self,
        task_id: &str,
        cascade: bool,
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        self.run_txn(|txn| {
            let now = Utc::now();
            let task = txn
                .get(task_id)?
                .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
            let calendar_id = task.calendar_id.clone();
            let former_parent = task.parent_id.clone();

            let mut events = Vec::new();

            if cascade {
                let mut subtree = txn.subtree(&calendar_id, &task.hierarchy_path)?;
                // Remove leaves first so the tree never dangles mid-wipe.
                subtree.sort_by(|a, b| b.hierarchy_level.cmp(&a.hierarchy_level));
                for doomed in &subtree {
                    txn.remove(&doomed.id)?;
                    events.push(
                        ChangeEvent::new(ChangeKind::TaskDeleted, &calendar_id, &doomed.id)
                            .with_actor(actor_id),
                    );
                }
                tracing::debug!(task_id, removed = subtree.len(), "cascade delete");
            } else {
                let parent_path = match &former_parent {
                    Some(parent_id) => {
                        // Tolerate an already-missing parent edge: children
                        // then become roots.
                        txn.get(parent_id)?.map(|parent| parent.hierarchy_path)
                    }
                    None => None,
                };

                let descendants = txn.subtree(&calendar_id, &task.hierarchy_path)?;
                for mut descendant in descendants {
                    if descendant.id == task.id {
                        continue;
                    }
                    let suffix = descendant.hierarchy_path[task.hierarchy_path.len() + 1..].to_string();
                    descendant.hierarchy_path = match &parent_path {
                        Some(prefix) => format!("{prefix}/{suffix}"),
                        None => suffix,
                    };
                    descendant.hierarchy_level -= 1;
                    if descendant.parent_id.as_deref() == Some(task.id.as_str()) {
                        descendant.parent_id = former_parent.clone();
                    }
                    descendant.touch(now);
                    txn.put(descendant)?;
                }

                txn.remove(&task.id)?;
                events.push(
                    ChangeEvent::new(ChangeKind::TaskDeleted, &calendar_id, &task.id)
                        .with_actor(actor_id),
                );
                tracing::debug!(task_id, "delete with reparent");
            }

            if let Some(parent_id) = &former_parent {
                let changes = progress::propagate_upward(txn, parent_id, self.max_depth, now)?;
                push_progress_events(&mut events, &calendar_id, actor_id, &changes, &mut HashSet::new());
            }

            Ok(MutationOutcome {
                task: None,
                tasks: Vec::new(),
                events,
            })
        })
    }

    /// Apply one uniform patch to many tasks of the same calendar. Parent
    /// changes are not permitted here.
    pub fn bulk_update(
        &self,
        calendar_id: &str,
        task_ids: &[String],
        patch: &TaskPatch,
        actor_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        if patch.parent.is_some() {
            return Err(Error::ValidationFailed(
                "parent changes are not permitted in bulk updates".to_string(),
            ));
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(progress) = patch.progress_percentage {
            validate_progress(progress)?;
        }

        self.run_txn(|txn| {
            let now = Utc::now();

            // Validate the whole batch before writing anything.
            let mut batch = Vec::with_capacity(task_ids.len());
            for id in task_ids {
                let task = txn
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(id.clone()))?;
                if task.calendar_id != calendar_id {
                    return Err(Error::NotFound(id.clone()));
                }
                batch.push(task);
            }

            let mut events = Vec::new();
            let mut parents = Vec::new();
            let mut tasks = Vec::with_capacity(batch.len());
            for mut task in batch {
                apply_fields(&mut task, patch);
                task.touch(now);
                txn.put(task.clone())?;
                events.push(
                    ChangeEvent::new(ChangeKind::TaskUpdated, calendar_id, &task.id)
                        .with_actor(actor_id)
                        .with_snapshot(&task),
                );
                if let Some(parent_id) = &task.parent_id {
                    if !parents.contains(parent_id) {
                        parents.push(parent_id.clone());
                    }
                }
                tasks.push(task);
            }

            let mut seen = HashSet::new();
            for parent_id in &parents {
                let changes = progress::propagate_upward(txn, parent_id, self.max_depth, now)?;
                push_progress_events(&mut events, calendar_id, actor_id, &changes, &mut seen);
            }

            Ok(MutationOutcome {
                task: None,
                tasks,
                events,
            })
        })
    }

    // Move `task` (and every descendant) under `new_parent_id`, rewriting
    // levels and materialized paths across the subtree.
    fn reparent_subtree<T: StoreTxn>(
        &self,
        txn: &mut T,
        task: &mut Task,
        new_parent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let new_parent = match new_parent_id {
            Some(parent_id) => {
                let mut lookup_err: Option<Error> = None;
                let cycles = hierarchy::would_cycle(parent_id, &task.id, self.max_depth, |id| {
                    match txn.get(id) {
                        Ok(found) => found,
                        Err(err) => {
                            lookup_err.get_or_insert(err);
                            None
                        }
                    }
                });
                if let Some(err) = lookup_err {
                    return Err(err);
                }
                if cycles {
                    return Err(Error::CycleDetected {
                        task: task.id.clone(),
                        parent: parent_id.to_string(),
                    });
                }
                Some(load_parent(txn, &task.calendar_id, parent_id)?)
            }
            None => None,
        };

        let placement = hierarchy::compute_hierarchy(new_parent.as_ref(), &task.id, self.max_depth)?;

        let descendants = txn.subtree(&task.calendar_id, &task.hierarchy_path)?;
        let subtree_height = descendants
            .iter()
            .map(|d| d.hierarchy_level.saturating_sub(task.hierarchy_level))
            .max()
            .unwrap_or(0);
        if placement.level + subtree_height > self.max_depth {
            return Err(Error::DepthExceeded {
                parent: new_parent_id.unwrap_or("<root>").to_string(),
                max: self.max_depth,
            });
        }

        let old_path = task.hierarchy_path.clone();
        let level_delta = i16::from(placement.level) - i16::from(task.hierarchy_level);

        for mut descendant in descendants {
            if descendant.id == task.id {
                continue;
            }
            hierarchy::rebase_descendant(&mut descendant, &old_path, &placement.path, level_delta);
            descendant.touch(now);
            txn.put(descendant)?;
        }

        task.parent_id = new_parent_id.map(|p| p.to_string());
        task.hierarchy_level = placement.level;
        task.hierarchy_path = placement.path;
        Ok(())
    }
}

fn load_parent<T: StoreTxn>(txn: &T, calendar_id: &str, parent_id: &str) -> Result<Task> {
    let parent = txn
        .get(parent_id)?
        .ok_or_else(|| Error::ParentNotFound(parent_id.to_string()))?;
    if parent.calendar_id != calendar_id {
        return Err(Error::ParentNotFound(parent_id.to_string()));
    }
    Ok(parent)
}

fn next_sort_order<T: StoreTxn>(
    txn: &T,
    calendar_id: &str,
    parent_id: Option<&str>,
) -> Result<i64> {
    let siblings = txn.children_of(calendar_id, parent_id)?;
    Ok(siblings
        .iter()
        .map(|task| task.sort_order + 1)
        .max()
        .unwrap_or(0))
}

// Field application shared by update and bulk_update. Status/progress
// coupling: setting status=done forces progress=100, setting progress=100
// forces status=done, and status wins when both appear in one patch.
fn apply_fields(task: &mut Task, patch: &TaskPatch) {
    if let Some(title) = &patch.title {
        task.title = title.clone();
    }
    if let Some(description) = &patch.description {
        task.description = Some(description.clone());
    }
    if let Some(sort_order) = patch.sort_order {
        task.sort_order = sort_order;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(depends_on) = &patch.depends_on {
        task.depends_on = depends_on.clone();
    }
    if let Some(blocks) = &patch.blocks {
        task.blocks = blocks.clone();
    }
    if let Some(archived) = patch.archived {
        task.archived = archived;
    }

    if let Some(progress) = patch.progress_percentage {
        task.progress_percentage = progress;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    match (patch.status, patch.progress_percentage) {
        (Some(TaskStatus::Done), _) => task.progress_percentage = MAX_PROGRESS,
        (Some(_), _) => {}
        (None, Some(MAX_PROGRESS)) => task.status = TaskStatus::Done,
        (None, _) => {}
    }
}

fn push_progress_events(
    events: &mut Vec<ChangeEvent>,
    calendar_id: &str,
    actor_id: Option<&str>,
    changes: &[AggregationChange],
    seen: &mut HashSet<String>,
) {
    for change in changes {
        if !seen.insert(change.task_id.clone()) {
            continue;
        }
        events.push(
            ChangeEvent::new(ChangeKind::ProgressUpdated, calendar_id, &change.task_id)
                .with_actor(actor_id)
                .with_progress(change.progress_percentage, change.status),
        );
    }
}
