//! Bottom-up progress aggregation.
//!
//! A parent's `progress_percentage` and `status` are a function of its
//! non-archived direct children. Leaf tasks are never touched here; their
//! progress is set directly by the mutator.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::StoreTxn;
use crate::task::{TaskStatus, MAX_PROGRESS};

/// Outcome of recomputing one task's derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recompute {
    pub progress_percentage: u8,
    pub status: TaskStatus,
    pub changed: bool,
}

/// One ancestor whose derived fields actually changed during propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationChange {
    pub task_id: String,
    pub progress_percentage: u8,
    pub status: TaskStatus,
}

/// Recompute `task_id`'s progress and status from its non-archived direct
/// children and persist the record iff something changed.
///
/// A task without non-archived children is a leaf for aggregation purposes:
/// its own fields are left untouched and `changed` is false.
pub fn recompute<T: StoreTxn>(txn: &mut T, task_id: &str, now: DateTime<Utc>) -> Result<Recompute> {
    let Some(mut task) = txn.get(task_id)? else {
        // Tolerate a missing ancestor edge; propagation just stops.
        return Ok(Recompute {
            progress_percentage: 0,
            status: TaskStatus::Todo,
            changed: false,
        });
    };

    let children = txn.children_of(&task.calendar_id, Some(task_id))?;
    let active: Vec<_> = children.iter().filter(|child| !child.archived).collect();
    if active.is_empty() {
        return Ok(Recompute {
            progress_percentage: task.progress_percentage,
            status: task.status,
            changed: false,
        });
    }

    let total = active.len() as u32;
    let completed = active
        .iter()
        .filter(|child| child.status == TaskStatus::Done)
        .count() as u32;
    let progress =
        ((f64::from(MAX_PROGRESS) * f64::from(completed)) / f64::from(total)).round() as u8;

    let status = next_status(task.status, progress);

    let changed = progress != task.progress_percentage || status != task.status;
    if changed {
        task.progress_percentage = progress;
        task.status = status;
        task.touch(now);
        txn.put(task)?;
    }

    Ok(Recompute {
        progress_percentage: progress,
        status,
        changed,
    })
}

// Deterministic transition rule, evaluated in order.
fn next_status(current: TaskStatus, progress: u8) -> TaskStatus {
    if progress == MAX_PROGRESS {
        TaskStatus::Done
    } else if progress > 0 && current == TaskStatus::Todo {
        TaskStatus::InProgress
    } else if progress == 0 && current == TaskStatus::Done {
        TaskStatus::Todo
    } else {
        current
    }
}

/// Recompute `start_id`, then its parent, and so on toward the root.
///
/// Stops as soon as a recompute reports no change or the chain ends. The walk
/// is additionally bounded by `max_depth + 1` hops so an inconsistent parent
/// edge cannot loop it.
pub fn propagate_upward<T: StoreTxn>(
    txn: &mut T,
    start_id: &str,
    max_depth: u8,
    now: DateTime<Utc>,
) -> Result<Vec<AggregationChange>> {
    let mut changes = Vec::new();
    let mut current = Some(start_id.to_string());

    for _ in 0..=max_depth {
        let Some(task_id) = current else { break };
        let outcome = recompute(txn, &task_id, now)?;
        if !outcome.changed {
            break;
        }
        changes.push(AggregationChange {
            task_id: task_id.clone(),
            progress_percentage: outcome.progress_percentage,
            status: outcome.status,
        });
        current = txn.get(&task_id)?.and_then(|task| task.parent_id);
    }

    Ok(changes)
}
