use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EventsError, Result};

/// Project id meaning "every project".
pub const ALL_PROJECTS: i64 = 0;

/// Kind of data change an event announces.
///
/// The server routes on `project_id` only and never looks at the kind.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DatabaseChanged,
    ProjectChanged,
    TaskChanged,
    ColumnChanged,
    LabelChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DatabaseChanged => "database_changed",
            EventType::ProjectChanged => "project_changed",
            EventType::TaskChanged => "task_changed",
            EventType::ColumnChanged => "column_changed",
            EventType::LabelChanged => "label_changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "database_changed" => Ok(Self::DatabaseChanged),
            "project_changed" => Ok(Self::ProjectChanged),
            "task_changed" => Ok(Self::TaskChanged),
            "column_changed" => Ok(Self::ColumnChanged),
            "label_changed" => Ok(Self::LabelChanged),
            other => Err(format!("Unknown event type: {}", other)),
        }
    }
}

/// Change notification fanned out by the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Scoped project, or [`ALL_PROJECTS`]
    pub project_id: i64,

    /// Set by whoever made the change
    pub timestamp: DateTime<Utc>,

    /// Stamped by the server at publish time; zero until then
    #[serde(default)]
    pub sequence_id: u64,
}

impl Event {
    pub fn new(kind: EventType, project_id: i64) -> Self {
        Self {
            kind,
            project_id,
            timestamp: Utc::now(),
            sequence_id: 0,
        }
    }

    /// Shorthand for the common "something in the database changed" event
    pub fn database_changed(project_id: i64) -> Self {
        Self::new(EventType::DatabaseChanged, project_id)
    }

    /// True when the event applies to every project
    pub fn is_global(&self) -> bool {
        self.project_id == ALL_PROJECTS
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.project_id < 0 {
            return Err(EventsError::InvalidProject(self.project_id));
        }
        Ok(())
    }
}

/// The one project a connection is currently looking at
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub project_id: i64,
}

impl Subscription {
    /// Build a subscription, rejecting negative project ids
    pub fn new(project_id: i64) -> Result<Self> {
        let subscription = Self { project_id };
        subscription.validate()?;
        Ok(subscription)
    }

    /// Subscription that matches every event
    pub fn all() -> Self {
        Self {
            project_id: ALL_PROJECTS,
        }
    }

    /// Whether `event` should be delivered under this subscription
    pub fn matches(&self, event: &Event) -> bool {
        event.project_id == ALL_PROJECTS
            || self.project_id == ALL_PROJECTS
            || event.project_id == self.project_id
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.project_id < 0 {
            return Err(EventsError::InvalidProject(self.project_id));
        }
        Ok(())
    }
}
