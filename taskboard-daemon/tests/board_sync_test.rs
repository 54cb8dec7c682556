//! Two UI processes sharing one daemon: a move made by one shows up on the
//! other's board.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskboard_daemon::board::Result;
use taskboard_daemon::{
    BoardError, BoardRefresher, BoardStore, DaemonConfig, EventPublisher, NotificationState,
    TaskSummary,
};
use taskboard_events::{
    status_notifier, CancellationToken, ClientConfig, EventClient, EventServer, NotificationLevel,
};
use taskboard_metrics::Metrics;
use tempfile::tempdir;

/// Shared "database" both UI processes read and write
#[derive(Default)]
struct SharedStore {
    tasks: Mutex<HashMap<i64, (i64, TaskSummary)>>,
}

impl SharedStore {
    fn with_task(project_id: i64, id: i64, column_id: i64) -> Arc<Self> {
        let store = Self::default();
        store.tasks.lock().unwrap().insert(
            id,
            (
                project_id,
                TaskSummary {
                    id,
                    title: "Write release notes".to_string(),
                    column_id,
                    position: 0,
                    labels: Vec::new(),
                },
            ),
        );
        Arc::new(store)
    }

    fn update<F: FnOnce(&mut TaskSummary)>(&self, task_id: i64, f: F) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let (_, task) = tasks
            .get_mut(&task_id)
            .ok_or(BoardError::TaskNotFound(task_id))?;
        f(task);
        Ok(())
    }
}

impl BoardStore for SharedStore {
    fn get_task_summaries_by_project(&self, project_id: i64) -> Result<Vec<TaskSummary>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|(project, _)| *project == project_id)
            .map(|(_, task)| task.clone())
            .collect())
    }

    fn move_task_to_column(&self, task_id: i64, column_id: i64) -> Result<()> {
        self.update(task_id, |task| task.column_id = column_id)
    }

    fn add_label_to_task(&self, task_id: i64, label_id: i64) -> Result<()> {
        self.update(task_id, |task| task.labels.push(label_id.to_string()))
    }

    fn remove_label_from_task(&self, task_id: i64, label_id: i64) -> Result<()> {
        let label = label_id.to_string();
        self.update(task_id, |task| task.labels.retain(|l| *l != label))
    }

    fn add_task_relation(&self, _from: i64, _to: i64, _relation_type_id: i64) -> Result<()> {
        Ok(())
    }
}

fn client_at(path: &Path) -> EventClient {
    let config = ClientConfig {
        heartbeat_interval: None,
        ..DaemonConfig::default().client_config()
    };
    EventClient::with_metrics(path, config, Arc::new(Metrics::new()))
}

#[tokio::test]
async fn test_move_is_seen_by_other_process() {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("board.sock");

    let server = Arc::new(
        EventServer::with_metrics(
            &socket_path,
            DaemonConfig::default().queue_config_with(|_| None),
            Arc::new(Metrics::new()),
        )
        .unwrap(),
    );
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(Arc::clone(&server).start(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let store = SharedStore::with_task(5, 42, 1);

    // Process A edits
    let editor = client_at(&socket_path);
    editor.connect().await.unwrap();
    let publisher = EventPublisher::new(Arc::clone(&store), editor.clone());

    // Process B watches project 5
    let notifications = Arc::new(NotificationState::new());
    let viewer = client_at(&socket_path);
    viewer.set_notify_func(status_notifier(Arc::clone(&notifications)));
    viewer.connect().await.unwrap();

    let refresh_metrics = Arc::new(Metrics::new());
    let mut refresher = BoardRefresher::with_metrics(
        Arc::clone(&store),
        viewer.clone(),
        1,
        Arc::clone(&refresh_metrics),
    )
    .unwrap();
    refresher.switch_project(5).await.unwrap();
    assert_eq!(refresher.tasks()[0].column_id, 1);

    let listen_cancel = CancellationToken::new();
    let events = viewer.listen(listen_cancel.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(publisher.move_task(5, 42, 3).await.unwrap());

    let runner = tokio::spawn(async move {
        let refreshes = refresher.run(events).await;
        (refreshes, refresher)
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while refresh_metrics.snapshot().refreshes_total < 2 {
        assert!(tokio::time::Instant::now() < deadline, "viewer never refreshed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    listen_cancel.cancel();
    let (refreshes, refresher) = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshes, 1);
    assert_eq!(refresher.tasks()[0].column_id, 3);

    let connected = notifications.drain();
    assert_eq!(connected[0].level, NotificationLevel::Info);

    editor.close().await.unwrap();
    viewer.close().await.unwrap();
    cancel.cancel();
    server_task.await.unwrap().unwrap();
}
