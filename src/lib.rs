//! plnr - hierarchical task planner
//!
//! Library crate behind the `plnr` CLI. The core is a calendar-scoped task
//! tree held in a pluggable [`store::TaskStore`], mutated through
//! [`mutator::TaskMutator`], with derived progress aggregation and change
//! event fan-out.

pub mod cli;
pub mod command;
pub mod config;
pub mod deps;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod mutator;
pub mod notify;
pub mod output;
pub mod progress;
pub mod store;
pub mod task;

pub use error::{Error, Result};
