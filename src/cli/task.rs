//! plnr task command implementations.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::deps::{self, DependencyRef};
use crate::error::{Error, Result};
use crate::mutator::{MutationOutcome, TaskMutator};
use crate::notify::{fan_out, ChangeNotifier, EventDestination};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::{FileStore, StoreTxn, TaskStore};
use crate::task::{ParentTarget, Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus};

/// Resolved per-invocation state shared by every task subcommand.
pub struct Context {
    pub mutator: TaskMutator<FileStore>,
    pub calendar: String,
    pub actor: Option<String>,
    pub default_status: TaskStatus,
    pub default_priority: TaskPriority,
    pub notifier: Option<Box<dyn ChangeNotifier>>,
    pub options: OutputOptions,
}

impl Context {
    pub fn resolve(
        data_dir: Option<PathBuf>,
        calendar: Option<String>,
        actor: Option<String>,
        events: Option<String>,
        json: bool,
        quiet: bool,
    ) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(".plnr"));
        std::fs::create_dir_all(&data_dir)?;
        let config = Config::load_from_dir(&data_dir);

        let store_dir = match &config.store.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => data_dir.join(dir),
            None => data_dir.clone(),
        };
        let store = FileStore::new(store_dir).with_lock_timeout(config.store.lock_timeout_ms);
        let mutator = TaskMutator::new(store)
            .with_max_depth(config.hierarchy.max_depth)
            .with_conflict_retries(config.store.conflict_retries);

        let destination = events.or_else(|| config.events.destination.clone());
        let notifier = match EventDestination::parse(destination.as_deref()) {
            Some(dest) => Some(Box::new(dest.open()?) as Box<dyn ChangeNotifier>),
            None => None,
        };
        // Events on stdout would interleave with a JSON envelope.
        let events_to_stdout = destination.as_deref().map(str::trim) == Some("-");

        Ok(Self {
            mutator,
            calendar: calendar.unwrap_or_else(|| config.calendar.clone()),
            actor: actor.or_else(|| Some(config.actor.default.clone())),
            default_status: config.default_status()?,
            default_priority: config.default_priority()?,
            notifier,
            options: OutputOptions {
                json: json && !events_to_stdout,
                quiet,
            },
        })
    }

    fn deliver(&self, outcome: &MutationOutcome) {
        if let Some(notifier) = &self.notifier {
            fan_out(notifier.as_ref(), &outcome.events);
        }
    }
}

pub struct NewOptions {
    pub title: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub position: Option<i64>,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
}

pub struct SetOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub parent: Option<String>,
    pub detach: bool,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub position: Option<i64>,
    pub depends_on: Option<Vec<String>>,
    pub blocks: Option<Vec<String>>,
    pub archived: Option<bool>,
}

pub struct BulkSetOptions {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub progress: Option<u8>,
    pub archived: Option<bool>,
}

fn parse_status(raw: Option<&str>) -> Result<Option<TaskStatus>> {
    raw.map(str::parse).transpose()
}

fn parse_priority(raw: Option<&str>) -> Result<Option<TaskPriority>> {
    raw.map(str::parse).transpose()
}

fn task_summary(human: &mut HumanOutput, task: &Task) {
    human.push_summary("id", &task.id);
    human.push_summary("status", task.status.as_str());
    human.push_summary("priority", task.priority.as_str());
    human.push_summary("progress", format!("{}%", task.progress_percentage));
    if let Some(parent) = &task.parent_id {
        human.push_summary("parent", parent);
    }
    human.push_summary("path", &task.hierarchy_path);
}

fn warn_dependencies(human: &mut HumanOutput, outcome: &MutationOutcome) {
    for event in &outcome.events {
        let Some(deps) = &event.dependencies else { continue };
        for dep in deps {
            human.push_warning(format!(
                "depends on unfinished task {} ({}, {})",
                dep.id,
                dep.title,
                dep.status.as_str()
            ));
        }
    }
}

pub fn run_new(ctx: &Context, opts: NewOptions) -> Result<()> {
    let draft = TaskDraft {
        id: opts
            .id
            .unwrap_or_else(|| ulid::Ulid::new().to_string().to_lowercase()),
        title: opts.title,
        description: opts.description,
        parent_id: opts.parent,
        sort_order: opts.position,
        status: Some(parse_status(opts.status.as_deref())?.unwrap_or(ctx.default_status)),
        priority: Some(parse_priority(opts.priority.as_deref())?.unwrap_or(ctx.default_priority)),
        progress_percentage: opts.progress,
        depends_on: opts.depends_on,
        blocks: opts.blocks,
    };

    let outcome = ctx
        .mutator
        .create(&ctx.calendar, &draft, ctx.actor.as_deref())?;
    ctx.deliver(&outcome);

    let task = outcome.task.as_ref().ok_or_else(|| {
        Error::OperationFailed("create returned no task".to_string())
    })?;
    let mut human = HumanOutput::new(format!("Created task: {}", task.title));
    task_summary(&mut human, task);
    warn_dependencies(&mut human, &outcome);
    emit_success(ctx.options, "task new", task, Some(&human))
}

pub fn run_set(ctx: &Context, opts: SetOptions) -> Result<()> {
    let parent = if opts.detach {
        Some(ParentTarget::Root)
    } else {
        opts.parent.map(ParentTarget::Parent)
    };
    let patch = TaskPatch {
        title: opts.title,
        description: opts.description,
        parent,
        sort_order: opts.position,
        status: parse_status(opts.status.as_deref())?,
        priority: parse_priority(opts.priority.as_deref())?,
        progress_percentage: opts.progress,
        depends_on: opts.depends_on,
        blocks: opts.blocks,
        archived: opts.archived,
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to change, pass at least one field".to_string(),
        ));
    }

    let outcome = ctx.mutator.update(&opts.id, &patch, ctx.actor.as_deref())?;
    ctx.deliver(&outcome);

    let task = outcome.task.as_ref().ok_or_else(|| {
        Error::OperationFailed("update returned no task".to_string())
    })?;
    let mut human = HumanOutput::new(format!("Updated task: {}", task.title));
    task_summary(&mut human, task);
    warn_dependencies(&mut human, &outcome);
    emit_success(ctx.options, "task set", task, Some(&human))
}

pub fn run_move(
    ctx: &Context,
    id: String,
    to: Option<String>,
    position: Option<i64>,
) -> Result<()> {
    let outcome = ctx
        .mutator
        .move_task(&id, to.as_deref(), position, ctx.actor.as_deref())?;
    ctx.deliver(&outcome);

    let task = outcome.task.as_ref().ok_or_else(|| {
        Error::OperationFailed("move returned no task".to_string())
    })?;
    let mut human = HumanOutput::new(format!("Moved task: {}", task.title));
    task_summary(&mut human, task);
    emit_success(ctx.options, "task move", task, Some(&human))
}

pub fn run_reorder(ctx: &Context, parent: Option<String>, ids: Vec<String>) -> Result<()> {
    let outcome = ctx.mutator.reorder(
        &ctx.calendar,
        parent.as_deref(),
        &ids,
        ctx.actor.as_deref(),
    )?;
    ctx.deliver(&outcome);

    let mut human = HumanOutput::new(format!(
        "Reordered {} under {}",
        pluralize(ids.len(), "task"),
        parent.as_deref().unwrap_or("the root level")
    ));
    for task in &outcome.tasks {
        human.push_detail(format!("{}. {} ({})", task.sort_order, task.title, task.id));
    }
    emit_success(ctx.options, "task reorder", &outcome.tasks, Some(&human))
}

pub fn run_rm(ctx: &Context, id: String, cascade: bool) -> Result<()> {
    let outcome = ctx.mutator.delete(&id, cascade, ctx.actor.as_deref())?;
    ctx.deliver(&outcome);

    let removed: Vec<&str> = outcome
        .events
        .iter()
        .filter(|event| event.kind == crate::notify::ChangeKind::TaskDeleted)
        .map(|event| event.task_id.as_str())
        .collect();
    let mut human = HumanOutput::new(format!("Removed {}", pluralize(removed.len(), "task")));
    for task_id in &removed {
        human.push_detail((*task_id).to_string());
    }
    if !cascade {
        human.push_detail("children were moved one level up".to_string());
    }
    emit_success(ctx.options, "task rm", &removed, Some(&human))
}

pub fn run_bulk_set(ctx: &Context, ids: Vec<String>, opts: BulkSetOptions) -> Result<()> {
    let patch = TaskPatch {
        status: parse_status(opts.status.as_deref())?,
        priority: parse_priority(opts.priority.as_deref())?,
        progress_percentage: opts.progress,
        archived: opts.archived,
        ..TaskPatch::default()
    };
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to change, pass at least one field".to_string(),
        ));
    }

    let outcome = ctx
        .mutator
        .bulk_update(&ctx.calendar, &ids, &patch, ctx.actor.as_deref())?;
    ctx.deliver(&outcome);

    let mut human = HumanOutput::new(format!("Updated {}", pluralize(outcome.tasks.len(), "task")));
    for task in &outcome.tasks {
        human.push_detail(format!(
            "{} ({}, {}%)",
            task.id,
            task.status.as_str(),
            task.progress_percentage
        ));
    }
    emit_success(ctx.options, "task bulk-set", &outcome.tasks, Some(&human))
}

#[derive(Serialize)]
struct ShowData {
    #[serde(flatten)]
    task: Task,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    incomplete_dependencies: Vec<DependencyRef>,
}

pub fn run_show(ctx: &Context, id: String) -> Result<()> {
    let data = ctx.mutator.store().with_transaction(|txn| {
        let task = txn.get(&id)?.ok_or_else(|| Error::NotFound(id.clone()))?;
        let incomplete = deps::incomplete_dependencies(txn, &task)?;
        Ok(ShowData {
            task,
            incomplete_dependencies: incomplete,
        })
    })?;

    let mut human = HumanOutput::new(format!("Task: {}", data.task.title));
    task_summary(&mut human, &data.task);
    if let Some(description) = &data.task.description {
        human.push_detail(description.clone());
    }
    if data.task.archived {
        human.push_detail("archived".to_string());
    }
    for dep in &data.incomplete_dependencies {
        human.push_warning(format!(
            "depends on unfinished task {} ({})",
            dep.id,
            dep.status.as_str()
        ));
    }
    emit_success(ctx.options, "task show", &data, Some(&human))
}

pub fn run_ls(ctx: &Context, parent: Option<String>, include_archived: bool) -> Result<()> {
    let mut tasks = ctx
        .mutator
        .store()
        .with_transaction(|txn| txn.children_of(&ctx.calendar, parent.as_deref()))?;
    if !include_archived {
        tasks.retain(|task| !task.archived);
    }

    let mut human = HumanOutput::new(format!(
        "{} under {}",
        pluralize(tasks.len(), "task"),
        parent.as_deref().unwrap_or("the root level")
    ));
    for task in &tasks {
        human.push_detail(format!(
            "[{}] {} ({}, {}%)",
            task.status.as_str(),
            task.title,
            task.id,
            task.progress_percentage
        ));
    }
    emit_success(ctx.options, "task ls", &tasks, Some(&human))
}

pub fn run_tree(ctx: &Context, root: Option<String>) -> Result<()> {
    let tasks = ctx.mutator.store().with_transaction(|txn| match &root {
        Some(root_id) => {
            let task = txn
                .get(root_id)?
                .ok_or_else(|| Error::NotFound(root_id.clone()))?;
            if task.calendar_id != ctx.calendar {
                return Err(Error::NotFound(root_id.clone()));
            }
            txn.subtree(&ctx.calendar, &task.hierarchy_path)
        }
        None => txn.by_calendar(&ctx.calendar),
    })?;

    let base_level = tasks.iter().map(|task| task.hierarchy_level).min().unwrap_or(0);
    let mut ordered = tasks.clone();
    // Depth-first order: a parent's path prefixes its children, siblings tie-break
    // on their own ordering inside each group.
    ordered.sort_by(|left, right| {
        path_sort_key(&tasks, left).cmp(&path_sort_key(&tasks, right))
    });

    let mut human = HumanOutput::new(format!("Task tree ({})", ctx.calendar));
    for task in &ordered {
        let indent = "  ".repeat(usize::from(task.hierarchy_level - base_level));
        let marker = if task.archived { "~" } else { "-" };
        human.push_detail(format!(
            "{indent}{marker} {} ({}, {}, {}%)",
            task.title,
            task.id,
            task.status.as_str(),
            task.progress_percentage
        ));
    }
    emit_success(ctx.options, "task tree", &ordered, Some(&human))
}

// Sort key for depth-first rendering: the task's path with every segment
// replaced by that sibling's (sort_order, created_at, id) rank tuple.
fn path_sort_key(all: &[Task], task: &Task) -> Vec<(i64, i64, String)> {
    let mut key = Vec::new();
    for prefix_len in 1..=task.hierarchy_path.split('/').count() {
        let prefix: Vec<&str> = task.hierarchy_path.split('/').take(prefix_len).collect();
        let segment_id = prefix[prefix.len() - 1];
        match all.iter().find(|t| t.id == segment_id) {
            Some(segment) => key.push((
                segment.sort_order,
                segment.created_at.timestamp_millis(),
                segment.id.clone(),
            )),
            None => key.push((i64::MAX, i64::MAX, segment_id.to_string())),
        }
    }
    key
}

#[derive(Serialize)]
struct DepsData {
    task_id: String,
    incomplete_dependencies: Vec<DependencyRef>,
    dependents: Vec<Task>,
}

pub fn run_deps(ctx: &Context, id: String) -> Result<()> {
    let data = ctx.mutator.store().with_transaction(|txn| {
        let task = txn.get(&id)?.ok_or_else(|| Error::NotFound(id.clone()))?;
        let incomplete = deps::incomplete_dependencies(txn, &task)?;
        let dependents = deps::dependents(txn, &task.calendar_id, &task.id)?;
        Ok(DepsData {
            task_id: task.id,
            incomplete_dependencies: incomplete,
            dependents,
        })
    })?;

    let mut human = HumanOutput::new(format!("Dependencies of {}", data.task_id));
    for dep in &data.incomplete_dependencies {
        human.push_detail(format!(
            "waits on {} ({}, {})",
            dep.id,
            dep.title,
            dep.status.as_str()
        ));
    }
    for dependent in &data.dependents {
        human.push_detail(format!("blocks {} ({})", dependent.id, dependent.title));
    }
    emit_success(ctx.options, "task deps", &data, Some(&human))
}

fn pluralize(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
