//! Task records for plnr.
//!
//! A task is a flat record; tree shape is derived from `parent_id` and the
//! materialized `hierarchy_path` rather than an in-memory object graph.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_PROGRESS: u8 = 100;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::ValidationFailed(format!(
                "unknown task status '{other}' (expected todo, in_progress, review, done, cancelled)"
            ))),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(Error::ValidationFailed(format!(
                "unknown task priority '{other}' (expected low, medium, high, urgent)"
            ))),
        }
    }
}

/// A task record as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub hierarchy_level: u8,
    pub hierarchy_path: String,
    pub sort_order: i64,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub progress_percentage: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Advance `updated_at` without ever moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }

}

/// True when `candidate` is the hierarchy path at `base` or one of its
/// descendants. Segment-aware, so `a/b` does not span `a/bc`.
pub fn path_within(base: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Caller-supplied fields for task creation. Everything the caller does not
/// set falls back to the defaults in the mutator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<String>,
}

/// Reparent target inside a patch. `Root` detaches the task; absent means
/// the parent is left alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParentTarget {
    Root,
    Parent(String),
}

impl ParentTarget {
    pub fn as_option(&self) -> Option<&str> {
        match self {
            ParentTarget::Root => None,
            ParentTarget::Parent(id) => Some(id),
        }
    }
}

/// Partial update applied by `TaskMutator::update` and `bulk_update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.parent.is_none()
            && self.sort_order.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.progress_percentage.is_none()
            && self.depends_on.is_none()
            && self.blocks.is_none()
            && self.archived.is_none()
    }
}

/// Validate a title for create/update.
pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::ValidationFailed("title cannot be empty".to_string()));
    }
    Ok(())
}

/// Validate a progress percentage for create/update.
pub fn validate_progress(progress: u8) -> Result<()> {
    if progress > MAX_PROGRESS {
        return Err(Error::ValidationFailed(format!(
            "progress_percentage must be 0-100, got {progress}"
        )));
    }
    Ok(())
}

/// Order tasks as siblings: `sort_order`, then `created_at`, then id.
pub fn sort_siblings(tasks: &mut [Task]) {
    tasks.sort_by(|left, right| {
        left.sort_order
            .cmp(&right.sort_order)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("blocked".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn priority_parse_is_case_insensitive() {
        assert_eq!("URGENT".parse::<TaskPriority>().unwrap(), TaskPriority::Urgent);
        assert!("p0".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn touch_never_regresses() {
        let now = Utc::now();
        let mut task = Task {
            id: "a".to_string(),
            calendar_id: "cal".to_string(),
            title: "A".to_string(),
            description: None,
            parent_id: None,
            hierarchy_level: 0,
            hierarchy_path: "a".to_string(),
            sort_order: 0,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            progress_percentage: 0,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        };
        task.touch(now - chrono::Duration::seconds(5));
        assert_eq!(task.updated_at, now);
        let later = now + chrono::Duration::seconds(5);
        task.touch(later);
        assert_eq!(task.updated_at, later);
    }

    #[test]
    fn path_within_matches_self_and_descendants_only() {
        assert!(path_within("a/b", "a/b"));
        assert!(path_within("a/b", "a/b/c"));
        assert!(!path_within("a/b", "a/bc"));
        assert!(!path_within("a/b", "a"));
        assert!(!path_within("a/b", "c/a/b"));
    }

    #[test]
    fn sibling_order_uses_sort_order_then_created_at() {
        let now = Utc::now();
        let mk = |id: &str, order: i64, offset: i64| Task {
            id: id.to_string(),
            calendar_id: "cal".to_string(),
            title: id.to_string(),
            description: None,
            parent_id: None,
            hierarchy_level: 0,
            hierarchy_path: id.to_string(),
            sort_order: order,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            progress_percentage: 0,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            archived: false,
            created_at: now + chrono::Duration::milliseconds(offset),
            updated_at: now,
        };
        let mut tasks = vec![mk("c", 1, 0), mk("a", 0, 5), mk("b", 0, 1)];
        sort_siblings(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
