//! Change events and the notifier boundary.
//!
//! Every mutation returns an ordered list of [`ChangeEvent`]s. Delivering
//! them is the transport adapter's job: the core hands the list to a
//! [`ChangeNotifier`] fire-and-forget, after the transaction has committed.
//! A delivery failure is logged and never rolls the mutation back.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::deps::DependencyRef;
use crate::error::{Error, Result};
use crate::task::{Task, TaskStatus};

pub const EVENT_SCHEMA_VERSION: &str = "plnr.event.v1";

/// What happened to a task.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    ProgressUpdated,
    DependencyWarning,
}

/// A domain change emitted by the mutation engine.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub schema_version: &'static str,
    pub event_id: Uuid,
    pub kind: ChangeKind,
    pub calendar_id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Full record for created/updated events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Task>,
    /// Derived fields for progress events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Unfinished dependencies for warning events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<DependencyRef>>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, calendar_id: &str, task_id: &str) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event_id: Uuid::new_v4(),
            kind,
            calendar_id: calendar_id.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            actor_id: None,
            snapshot: None,
            progress: None,
            status: None,
            dependencies: None,
        }
    }

    pub fn with_actor(mut self, actor_id: Option<&str>) -> Self {
        self.actor_id = actor_id.map(|a| a.to_string());
        self
    }

    pub fn with_snapshot(mut self, task: &Task) -> Self {
        self.snapshot = Some(task.clone());
        self
    }

    pub fn with_progress(mut self, progress: u8, status: TaskStatus) -> Self {
        self.progress = Some(progress);
        self.status = Some(status);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<DependencyRef>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }
}

/// Delivery boundary toward subscribers. The core never knows the transport.
pub trait ChangeNotifier {
    fn publish(&self, event: &ChangeEvent) -> Result<()>;
}

/// Deliver `events` to `notifier`, logging failures instead of propagating
/// them. The mutation has already committed by the time this runs.
pub fn fan_out<N: ChangeNotifier + ?Sized>(notifier: &N, events: &[ChangeEvent]) {
    for event in events {
        if let Err(err) = notifier.publish(event) {
            tracing::warn!(
                kind = ?event.kind,
                calendar_id = %event.calendar_id,
                task_id = %event.task_id,
                error = %err,
                "change event delivery failed"
            );
        }
    }
}

/// Where the CLI sends its event stream.
#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// JSONL notifier writing one event per line to stdout or a file.
pub struct EventSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }
}

impl ChangeNotifier for EventSink {
    fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::OperationFailed("event sink poisoned".to_string()))?;
        writer.write_all(&serialized)?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

const TOPIC_CHANNEL_CAPACITY: usize = 256;

/// In-process fan-out bus, one broadcast topic per calendar.
///
/// A push transport subscribes to a calendar and forwards whatever arrives;
/// publishing to a calendar nobody listens to is a no-op.
#[derive(Default)]
pub struct TopicBus {
    topics: Mutex<HashMap<String, tokio::sync::broadcast::Sender<ChangeEvent>>>,
}

impl TopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every future event of one calendar.
    pub fn subscribe(&self, calendar_id: &str) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(calendar_id.to_string())
            .or_insert_with(|| tokio::sync::broadcast::channel(TOPIC_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl ChangeNotifier for TopicBus {
    fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = topics.get(&event.calendar_id) {
            // A send error only means there are no receivers right now.
            let _ = sender.send(event.clone());
        }
        Ok(())
    }
}
