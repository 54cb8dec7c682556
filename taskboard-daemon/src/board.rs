//! Glue between board persistence and the event daemon.
//!
//! Persistence itself lives elsewhere; this module only needs the handful
//! of calls a UI process makes around change events. [`EventPublisher`]
//! announces mutations after they are saved, and [`BoardRefresher`] reloads
//! the visible project when an announcement for it arrives.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use taskboard_events::{Event, EventClient, EventReceiver, EventType, EventsError, Subscription};
use taskboard_metrics::Metrics;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Column {0} not found")]
    ColumnNotFound(i64),

    #[error("Label {0} not found")]
    LabelNotFound(i64),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Events(#[from] EventsError),
}

pub type Result<T> = std::result::Result<T, BoardError>;

/// One card as shown on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: i64,
    pub title: String,
    pub column_id: i64,
    pub position: i32,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Task, column and label persistence used by the UI
pub trait BoardStore: Send + Sync {
    fn get_task_summaries_by_project(&self, project_id: i64) -> Result<Vec<TaskSummary>>;

    fn move_task_to_column(&self, task_id: i64, column_id: i64) -> Result<()>;

    fn add_label_to_task(&self, task_id: i64, label_id: i64) -> Result<()>;

    fn remove_label_from_task(&self, task_id: i64, label_id: i64) -> Result<()>;

    fn add_task_relation(&self, from_task_id: i64, to_task_id: i64, relation_type_id: i64)
        -> Result<()>;
}

/// Keeps one project's task list in sync with remote changes
pub struct BoardRefresher<S: BoardStore + ?Sized> {
    store: Arc<S>,
    client: EventClient,
    subscription: Subscription,
    tasks: Vec<TaskSummary>,
    metrics: Arc<Metrics>,
}

impl<S: BoardStore + ?Sized> BoardRefresher<S> {
    pub fn new(store: Arc<S>, client: EventClient, project_id: i64) -> Result<Self> {
        Self::with_metrics(store, client, project_id, taskboard_metrics::global())
    }

    pub fn with_metrics(
        store: Arc<S>,
        client: EventClient,
        project_id: i64,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            client,
            subscription: Subscription::new(project_id)?,
            tasks: Vec::new(),
            metrics,
        })
    }

    pub fn project_id(&self) -> i64 {
        self.subscription.project_id
    }

    pub fn tasks(&self) -> &[TaskSummary] {
        &self.tasks
    }

    /// Re-read the visible project from the store
    pub fn reload(&mut self) -> Result<usize> {
        self.tasks = self
            .store
            .get_task_summaries_by_project(self.subscription.project_id)?;
        self.metrics.inc_refreshes_total();
        tracing::debug!(
            "Reloaded project {} ({} tasks)",
            self.subscription.project_id,
            self.tasks.len()
        );
        Ok(self.tasks.len())
    }

    /// Reload if `event` concerns the visible project. Returns whether it did.
    pub fn handle_event(&mut self, event: &Event) -> Result<bool> {
        if !self.subscription.matches(event) {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    /// Show a different project and follow its events.
    ///
    /// An offline client remembers the project and subscribes once it
    /// reconnects, so that case is not an error.
    pub async fn switch_project(&mut self, project_id: i64) -> Result<()> {
        let subscription = Subscription::new(project_id)?;
        if subscription != self.subscription {
            tracing::info!(
                "Switching board from project {} to {}",
                self.subscription.project_id,
                project_id
            );
        }
        self.subscription = subscription;

        match self.client.subscribe(project_id).await {
            Ok(()) | Err(EventsError::NotConnected) => {}
            Err(e) => tracing::warn!("Could not subscribe to project {}: {}", project_id, e),
        }

        self.reload()?;
        Ok(())
    }

    /// Apply events until the channel closes, returning how many reloads ran
    pub async fn run(&mut self, mut events: EventReceiver) -> u64 {
        let mut refreshes = 0;
        while let Some(event) = events.recv().await {
            match self.handle_event(&event) {
                Ok(true) => refreshes += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Refresh after event seq {} failed: {}",
                    event.sequence_id,
                    e
                ),
            }
        }
        refreshes
    }
}

/// Saves a mutation, then tells other processes about it
pub struct EventPublisher<S: BoardStore + ?Sized> {
    store: Arc<S>,
    client: EventClient,
}

impl<S: BoardStore + ?Sized> EventPublisher<S> {
    pub fn new(store: Arc<S>, client: EventClient) -> Self {
        Self { store, client }
    }

    /// Move a task and announce `task_changed`.
    ///
    /// Returns whether the announcement went out. The move is kept either way.
    pub async fn move_task(&self, project_id: i64, task_id: i64, column_id: i64) -> Result<bool> {
        self.store.move_task_to_column(task_id, column_id)?;
        Ok(self.announce(EventType::TaskChanged, project_id).await)
    }

    pub async fn add_label(&self, project_id: i64, task_id: i64, label_id: i64) -> Result<bool> {
        self.store.add_label_to_task(task_id, label_id)?;
        Ok(self.announce(EventType::LabelChanged, project_id).await)
    }

    pub async fn remove_label(&self, project_id: i64, task_id: i64, label_id: i64) -> Result<bool> {
        self.store.remove_label_from_task(task_id, label_id)?;
        Ok(self.announce(EventType::LabelChanged, project_id).await)
    }

    pub async fn add_relation(
        &self,
        project_id: i64,
        from_task_id: i64,
        to_task_id: i64,
        relation_type_id: i64,
    ) -> Result<bool> {
        self.store
            .add_task_relation(from_task_id, to_task_id, relation_type_id)?;
        Ok(self.announce(EventType::TaskChanged, project_id).await)
    }

    async fn announce(&self, kind: EventType, project_id: i64) -> bool {
        match self.client.send_event(Event::new(kind, project_id)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Saved {} for project {} but could not announce it: {}",
                    kind,
                    project_id,
                    e
                );
                false
            }
        }
    }
}
