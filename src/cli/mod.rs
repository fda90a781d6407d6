//! Command-line interface for plnr
//!
//! This module defines the CLI structure using clap derive macros.
//! The task subcommands live in their own submodule.

use clap::{Parser, Subcommand};

use crate::error::Result;

mod task;

/// plnr - hierarchical task planner
///
/// A CLI that maintains calendar-scoped task trees with derived progress,
/// sibling ordering, and dependency warnings.
#[derive(Parser, Debug)]
#[command(name = "plnr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory holding the task store (defaults to ./.plnr)
    #[arg(long, global = true, env = "PLNR_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Calendar the command operates on
    #[arg(long, global = true, env = "PLNR_CALENDAR")]
    pub calendar: Option<String>,

    /// Actor identity recorded on change events
    #[arg(long, global = true, env = "PLNR_ACTOR")]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write change events as JSONL to a file, or "-" for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        /// Task title
        title: String,

        /// Task id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,

        /// Longer description
        #[arg(long)]
        description: Option<String>,

        /// Initial status: todo, in_progress, review, done, cancelled
        #[arg(long)]
        status: Option<String>,

        /// Priority: low, medium, high, urgent
        #[arg(long)]
        priority: Option<String>,

        /// Initial progress percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// Position among siblings (appended when omitted)
        #[arg(long)]
        position: Option<i64>,

        /// Task ids this task depends on
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,

        /// Task ids this task blocks
        #[arg(long)]
        blocks: Vec<String>,
    },

    /// Update task fields
    Set {
        /// Task id
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New parent task id
        #[arg(long, conflicts_with = "detach")]
        parent: Option<String>,

        /// Detach the task to the root level
        #[arg(long)]
        detach: bool,

        /// New status
        #[arg(long)]
        status: Option<String>,

        /// New priority
        #[arg(long)]
        priority: Option<String>,

        /// New progress percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// New position among siblings
        #[arg(long)]
        position: Option<i64>,

        /// Replace the depends-on list
        #[arg(long = "depends-on")]
        depends_on: Option<Vec<String>>,

        /// Replace the blocks list
        #[arg(long)]
        blocks: Option<Vec<String>>,

        /// Archive or unarchive the task
        #[arg(long)]
        archived: Option<bool>,
    },

    /// Move a task (and its subtree) to another parent
    Move {
        /// Task id
        id: String,

        /// New parent task id (omit to move to the root level)
        #[arg(long)]
        to: Option<String>,

        /// Position among the new siblings
        #[arg(long)]
        position: Option<i64>,
    },

    /// Reorder tasks within one sibling group
    Reorder {
        /// Task ids in the desired order
        #[arg(required = true)]
        ids: Vec<String>,

        /// Parent of the sibling group (omit for the root level)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Remove a task
    Rm {
        /// Task id
        id: String,

        /// Remove the whole subtree instead of reparenting children
        #[arg(long)]
        cascade: bool,
    },

    /// Apply one patch to several tasks
    BulkSet {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// New status
        #[arg(long)]
        status: Option<String>,

        /// New priority
        #[arg(long)]
        priority: Option<String>,

        /// New progress percentage (0-100)
        #[arg(long)]
        progress: Option<u8>,

        /// Archive or unarchive the tasks
        #[arg(long)]
        archived: Option<bool>,
    },

    /// Show one task
    Show {
        /// Task id
        id: String,
    },

    /// List tasks
    Ls {
        /// Only direct children of this task (omit for the root level)
        #[arg(long)]
        parent: Option<String>,

        /// Include archived tasks
        #[arg(long)]
        archived: bool,
    },

    /// Print the task tree
    Tree {
        /// Subtree root (omit for the whole calendar)
        #[arg(long)]
        root: Option<String>,
    },

    /// Show dependencies and dependents of a task
    Deps {
        /// Task id
        id: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = task::Context::resolve(
            self.data_dir,
            self.calendar,
            self.actor,
            self.events,
            self.json,
            self.quiet,
        )?;

        match self.command {
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    title,
                    id,
                    parent,
                    description,
                    status,
                    priority,
                    progress,
                    position,
                    depends_on,
                    blocks,
                } => task::run_new(
                    &ctx,
                    task::NewOptions {
                        title,
                        id,
                        parent,
                        description,
                        status,
                        priority,
                        progress,
                        position,
                        depends_on,
                        blocks,
                    },
                ),
                TaskCommands::Set {
                    id,
                    title,
                    description,
                    parent,
                    detach,
                    status,
                    priority,
                    progress,
                    position,
                    depends_on,
                    blocks,
                    archived,
                } => task::run_set(
                    &ctx,
                    task::SetOptions {
                        id,
                        title,
                        description,
                        parent,
                        detach,
                        status,
                        priority,
                        progress,
                        position,
                        depends_on,
                        blocks,
                        archived,
                    },
                ),
                TaskCommands::Move { id, to, position } => {
                    task::run_move(&ctx, id, to, position)
                }
                TaskCommands::Reorder { ids, parent } => task::run_reorder(&ctx, parent, ids),
                TaskCommands::Rm { id, cascade } => task::run_rm(&ctx, id, cascade),
                TaskCommands::BulkSet {
                    ids,
                    status,
                    priority,
                    progress,
                    archived,
                } => task::run_bulk_set(
                    &ctx,
                    ids,
                    task::BulkSetOptions {
                        status,
                        priority,
                        progress,
                        archived,
                    },
                ),
                TaskCommands::Show { id } => task::run_show(&ctx, id),
                TaskCommands::Ls { parent, archived } => task::run_ls(&ctx, parent, archived),
                TaskCommands::Tree { root } => task::run_tree(&ctx, root),
                TaskCommands::Deps { id } => task::run_deps(&ctx, id),
            },
        }
    }
}
