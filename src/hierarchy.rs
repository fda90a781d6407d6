//! Tree-shape invariant helpers.
//!
//! Pure functions over task records: no store access, no side effects.
//! The tree itself lives in the store as flat records; these helpers compute
//! levels and materialized paths and check the shape invariants the mutator
//! enforces.

use crate::error::{Error, Result};
use crate::task::Task;

/// Default maximum hierarchy level (0 = root, so four levels in total).
pub const DEFAULT_MAX_DEPTH: u8 = 3;

/// Level and materialized path for a task placed under `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub level: u8,
    pub path: String,
}

/// Compute level and path for `self_id` under an optional parent.
///
/// Roots get `{0, self_id}`. Fails with `DepthExceeded` when the parent is
/// already at `max_depth`.
pub fn compute_hierarchy(parent: Option<&Task>, self_id: &str, max_depth: u8) -> Result<Hierarchy> {
    match parent {
        None => Ok(Hierarchy {
            level: 0,
            path: self_id.to_string(),
        }),
        Some(parent) => {
            if parent.hierarchy_level >= max_depth {
                return Err(Error::DepthExceeded {
                    parent: parent.id.clone(),
                    max: max_depth,
                });
            }
            Ok(Hierarchy {
                level: parent.hierarchy_level + 1,
                path: format!("{}/{}", parent.hierarchy_path, self_id),
            })
        }
    }
}

/// Walk the candidate parent's ancestor chain and report whether `task_id`
/// appears in it (which would make `task_id` its own ancestor).
///
/// The walk is bounded by `max_depth + 1` hops so it terminates even if an
/// ancestor edge is inconsistent.
pub fn would_cycle<F>(
    candidate_parent_id: &str,
    task_id: &str,
    max_depth: u8,
    mut ancestor_lookup: F,
) -> bool
where
    F: FnMut(&str) -> Option<Task>,
{
    if candidate_parent_id == task_id {
        return true;
    }
    let mut current = candidate_parent_id.to_string();
    for _ in 0..=max_depth {
        match ancestor_lookup(&current) {
            Some(task) => match task.parent_id {
                Some(parent_id) if parent_id == task_id => return true,
                Some(parent_id) => current = parent_id,
                None => return false,
            },
            None => return false,
        }
    }
    false
}

/// Rewrite level and path for a descendant after its ancestor chain changed.
///
/// `ancestor_old_path` / `ancestor_new_path` describe the moved ancestor;
/// `level_delta` is the change in that ancestor's level. The descendant's
/// path keeps its suffix below the ancestor.
pub fn rebase_descendant(
    task: &mut Task,
    ancestor_old_path: &str,
    ancestor_new_path: &str,
    level_delta: i16,
) {
    debug_assert!(task.hierarchy_path.starts_with(ancestor_old_path));
    let suffix = &task.hierarchy_path[ancestor_old_path.len()..];
    task.hierarchy_path = format!("{ancestor_new_path}{suffix}");
    let level = i16::from(task.hierarchy_level) + level_delta;
    task.hierarchy_level = level.clamp(0, i16::from(u8::MAX)) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskStatus};
    use chrono::Utc;

    fn task(id: &str, parent_id: Option<&str>, level: u8, path: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            calendar_id: "cal".to_string(),
            title: id.to_string(),
            description: None,
            parent_id: parent_id.map(|p| p.to_string()),
            hierarchy_level: level,
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
    fn root_hierarchy_is_level_zero_own_id() {
        let h = compute_hierarchy(None, "a", DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(h, Hierarchy { level: 0, path: "a".to_string() });
    }

    #[test]
    fn child_hierarchy_extends_parent_path() {
        let parent = task("a", None, 0, "a");
        let h = compute_hierarchy(Some(&parent), "b", DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(h.level, 1);
        assert_eq!(h.path, "a/b");
    }

    #[test]
    fn depth_limit_rejects_children_of_max_level_parents() {
        let parent = task("d", Some("c"), 3, "a/b/c/d");
        let err = compute_hierarchy(Some(&parent), "e", DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded { max: 3, .. }));
    }

    #[test]
    fn cycle_detected_through_ancestor_chain() {
        let a = task("a", None, 0, "a");
        let b = task("b", Some("a"), 1, "a/b");
        let c = task("c", Some("b"), 2, "a/b/c");
        let lookup = |id: &str| match id {
            "a" => Some(a.clone()),
            "b" => Some(b.clone()),
            "c" => Some(c.clone()),
            _ => None,
        };

        // Moving "a" under its own grandchild is a cycle.
        assert!(would_cycle("c", "a", DEFAULT_MAX_DEPTH, lookup));
        // A task is trivially its own ancestor.
        assert!(would_cycle("a", "a", DEFAULT_MAX_DEPTH, lookup));
        // Unrelated placement is fine.
        assert!(!would_cycle("c", "x", DEFAULT_MAX_DEPTH, lookup));
    }

    #[test]
    fn cycle_walk_terminates_on_missing_ancestor_edge() {
        // "b" claims a parent the lookup cannot resolve.
        let b = task("b", Some("ghost"), 1, "ghost/b");
        let lookup = |id: &str| if id == "b" { Some(b.clone()) } else { None };
        assert!(!would_cycle("b", "x", DEFAULT_MAX_DEPTH, lookup));
    }

    #[test]
    fn rebase_descendant_rewrites_path_and_level() {
        let mut grandchild = task("c", Some("b"), 2, "a/b/c");
        // "b" moved from under "a" to root: old path "a/b", new path "b".
        rebase_descendant(&mut grandchild, "a/b", "b", -1);
        assert_eq!(grandchild.hierarchy_path, "b/c");
        assert_eq!(grandchild.hierarchy_level, 1);
    }
}
