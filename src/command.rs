//! Transport-neutral mutation commands.
//!
//! A push channel or batch importer submits serialized commands; the CLI
//! builds the same values directly. `dispatch` is the single entry point in
//! front of [`TaskMutator`], so every transport shares one validation and
//! event path.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::mutator::{MutationOutcome, TaskMutator};
use crate::notify::ChangeEvent;
use crate::store::TaskStore;
use crate::task::{Task, TaskDraft, TaskPatch};

/// One mutation request, tagged by operation name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Command {
    Create {
        calendar_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        task: TaskDraft,
    },
    Update {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        patch: TaskPatch,
    },
    Move {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_parent_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_sort_order: Option<i64>,
    },
    Reorder {
        calendar_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        ordered_ids: Vec<String>,
    },
    Delete {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        #[serde(default)]
        cascade: bool,
    },
    BulkUpdate {
        calendar_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        task_ids: Vec<String>,
        patch: TaskPatch,
    },
}

/// Outcome envelope mirrored back to the submitting transport. Serializes
/// flat, discriminated by the boolean `ok` field: `{"ok": true, task?,
/// tasks?, events}` or `{"ok": false, error_kind, message}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Ok {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tasks: Vec<Task>,
        events: Vec<ChangeEvent>,
    },
    Error {
        ok: bool,
        error_kind: &'static str,
        message: String,
    },
}

impl CommandReply {
    fn ok(outcome: MutationOutcome) -> Self {
        CommandReply::Ok {
            ok: true,
            task: outcome.task,
            tasks: outcome.tasks,
            events: outcome.events,
        }
    }

    fn error(err: &Error) -> Self {
        CommandReply::Error {
            ok: false,
            error_kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Run one command against the engine. Failures become error replies rather
/// than propagating, so a transport loop never dies on a bad command.
pub fn dispatch<S: TaskStore>(mutator: &TaskMutator<S>, command: Command) -> CommandReply {
    let result = match command {
        Command::Create {
            calendar_id,
            actor_id,
            task,
        } => mutator.create(&calendar_id, &task, actor_id.as_deref()),
        Command::Update {
            task_id,
            actor_id,
            patch,
        } => mutator.update(&task_id, &patch, actor_id.as_deref()),
        Command::Move {
            task_id,
            actor_id,
            new_parent_id,
            new_sort_order,
        } => mutator.move_task(
            &task_id,
            new_parent_id.as_deref(),
            new_sort_order,
            actor_id.as_deref(),
        ),
        Command::Reorder {
            calendar_id,
            actor_id,
            parent_id,
            ordered_ids,
        } => mutator.reorder(
            &calendar_id,
            parent_id.as_deref(),
            &ordered_ids,
            actor_id.as_deref(),
        ),
        Command::Delete {
            task_id,
            actor_id,
            cascade,
        } => mutator.delete(&task_id, cascade, actor_id.as_deref()),
        Command::BulkUpdate {
            calendar_id,
            actor_id,
            task_ids,
            patch,
        } => mutator.bulk_update(&calendar_id, &task_ids, &patch, actor_id.as_deref()),
    };

    match result {
        Ok(outcome) => CommandReply::ok(outcome),
        Err(err) => {
            tracing::debug!(error = %err, kind = err.kind(), "command rejected");
            CommandReply::error(&err)
        }
    }
}
