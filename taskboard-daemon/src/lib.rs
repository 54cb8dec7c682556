//! Taskboard daemon library
//!
//! Configuration, board refresh glue and notification state shared by the
//! `taskboard-daemon` binary and UI processes.

pub mod board;
pub mod config;
pub mod notifications;

pub use board::{BoardError, BoardRefresher, BoardStore, EventPublisher, TaskSummary};
pub use config::{DaemonConfig, ReconnectSettings};
pub use notifications::{Notification, NotificationState};
