//! Configuration loading and management
//!
//! Handles parsing of `.plnr.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::hierarchy::DEFAULT_MAX_DEPTH;
use crate::mutator::DEFAULT_CONFLICT_RETRIES;
use crate::task::{TaskPriority, TaskStatus};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default calendar for commands that do not name one
    #[serde(default = "default_calendar")]
    pub calendar: String,

    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Hierarchy configuration
    #[serde(default)]
    pub hierarchy: HierarchyConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Tasks configuration
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Event stream configuration
    #[serde(default)]
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calendar: default_calendar(),
            actor: ActorConfig::default(),
            hierarchy: HierarchyConfig::default(),
            store: StoreConfig::default(),
            tasks: TasksConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

fn default_calendar() -> String {
    "default".to_string()
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Default actor name when none specified
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    "unknown".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

/// Hierarchy shape limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Maximum hierarchy level (0 = root)
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
}

fn default_max_depth() -> u8 {
    DEFAULT_MAX_DEPTH
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory override; relative paths resolve against the config
    /// file's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Internal retries for lost optimistic transactions
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Store lock acquisition timeout in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_conflict_retries() -> u32 {
    DEFAULT_CONFLICT_RETRIES
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            conflict_retries: default_conflict_retries(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Tasks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Status assigned to new tasks when none is given
    #[serde(default = "default_task_status")]
    pub default_status: String,

    /// Priority assigned to new tasks when none is given
    #[serde(default = "default_task_priority")]
    pub default_priority: String,
}

fn default_task_status() -> String {
    TaskStatus::default().as_str().to_string()
}

fn default_task_priority() -> String {
    TaskPriority::default().as_str().to_string()
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_status: default_task_status(),
            default_priority: default_task_priority(),
        }
    }
}

/// Event stream configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventsConfig {
    /// Default event destination ("-" for stdout, otherwise a file path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl Config {
    /// Load configuration from a `.plnr.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a data directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(".plnr.toml");
        if config_path.exists() {
            Self::load(&config_path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Default status for new tasks, parsed.
    pub fn default_status(&self) -> crate::error::Result<TaskStatus> {
        self.tasks.default_status.parse()
    }

    /// Default priority for new tasks, parsed.
    pub fn default_priority(&self) -> crate::error::Result<TaskPriority> {
        self.tasks.default_priority.parse()
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.calendar.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "calendar cannot be empty".to_string(),
            ));
        }
        if self.hierarchy.max_depth == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "hierarchy.max_depth must be >= 1".to_string(),
            ));
        }
        if self.store.conflict_retries == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "store.conflict_retries must be >= 1".to_string(),
            ));
        }
        self.tasks
            .default_status
            .parse::<TaskStatus>()
            .map_err(|err| {
                crate::error::Error::InvalidConfig(format!("tasks.default_status: {err}"))
            })?;
        self.tasks
            .default_priority
            .parse::<TaskPriority>()
            .map_err(|err| {
                crate::error::Error::InvalidConfig(format!("tasks.default_priority: {err}"))
            })?;
        Ok(())
    }
}
