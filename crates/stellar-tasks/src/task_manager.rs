//! Task manager: task lifecycle, the in-process active map, and a
//! per-task supervisor spawned onto `tokio` with a `CancellationToken` for
//! cooperative shutdown.
//!
//! Each running task gets one supervisor, which in turn spawns two drain
//! tasks (one for scan results, one for progress ticks) reading off bounded
//! channels until the scanner's senders drop.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use stellar_core::{Error, Result, ScanConfig, Task, TaskKind, TaskStatus};
use stellar_scanner::{PortScanner, RateLimiter};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::result_handler::ResultHandler;

/// A started task's in-memory handle: its cancellation token and a signal
/// for `StopTask` to await completion of its supervisor.
struct Runner {
    cancel: CancellationToken,
    done: Arc<Notify>,
    status: Arc<RwLock<TaskStatus>>,
    progress: Arc<RwLock<f64>>,
}

/// Owns the in-process `{taskId -> runner}` active map and drives task
/// creation, start, stop, and status/progress queries.
pub struct TaskManager {
    handler: Arc<ResultHandler>,
    active: Arc<RwLock<HashMap<Uuid, Arc<Runner>>>>,
}

impl TaskManager {
    pub fn new(handler: ResultHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Assign id/createdAt, status=pending, progress=0, and persist.
    pub async fn create_task(&self, project_id: &str, kind: TaskKind, targets: Vec<String>, config: ScanConfig) -> Result<Task> {
        let task = Task::new(project_id, kind, targets, config);
        self.handler.save_task(&task).await?;
        Ok(task)
    }

    /// Reject if already active or in a terminal status; otherwise spawn
    /// the supervisor and register the runner.
    pub async fn start_task(&self, task_id: Uuid) -> Result<()> {
        if self.active.read().contains_key(&task_id) {
            return Err(Error::Conflict(format!("task {task_id} already running")));
        }

        let mut task = self
            .handler
            .storage()
            .get_task(TaskKind::Port, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        if task.status.is_terminal() {
            return Err(Error::Conflict(format!("task {task_id} already in terminal status {}", task.status)));
        }

        task = self.handler.update_task_status(task, TaskStatus::Running).await?;

        let cancel = CancellationToken::new();
        let done = Arc::new(Notify::new());
        let status = Arc::new(RwLock::new(TaskStatus::Running));
        let progress = Arc::new(RwLock::new(0.0));

        let runner = Arc::new(Runner {
            cancel: cancel.clone(),
            done: done.clone(),
            status: status.clone(),
            progress: progress.clone(),
        });
        self.active.write().insert(task_id, runner);

        let handler = self.handler.clone();
        let active = self.active.clone();
        tokio::spawn(supervise(handler, active, task, cancel, done, status, progress));

        Ok(())
    }

    /// Cancel the runner's token, await its completion, then report
    /// stopped. Idempotent: a second call on an already-finished task is a
    /// clean not-running error rather than a panic.
    pub async fn stop_task(&self, task_id: Uuid) -> Result<()> {
        let runner = self.active.read().get(&task_id).cloned();
        let Some(runner) = runner else {
            return Err(Error::NotFound(format!("task {task_id} is not running")));
        };

        runner.cancel.cancel();
        runner.done.notified().await;
        Ok(())
    }

    /// Prefer the in-memory runner, fall back to the persisted task.
    pub async fn get_task_status(&self, task_id: Uuid) -> Result<TaskStatus> {
        if let Some(runner) = self.active.read().get(&task_id) {
            return Ok(*runner.status.read());
        }
        let task = self
            .handler
            .storage()
            .get_task(TaskKind::Port, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        Ok(task.status)
    }

    pub async fn get_task_progress(&self, task_id: Uuid) -> Result<f64> {
        if let Some(runner) = self.active.read().get(&task_id) {
            return Ok(*runner.progress.read());
        }
        let task = self
            .handler
            .storage()
            .get_task(TaskKind::Port, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        Ok(task.progress)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.handler
            .storage()
            .get_task(TaskKind::Port, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    pub async fn list_tasks(&self, project_id: Option<&str>, limit: i64, skip: i64) -> Result<Vec<Task>> {
        self.handler.storage().list_tasks(TaskKind::Port, project_id, limit, skip).await
    }

    pub async fn get_task_results(&self, task_id: Uuid, limit: i64, skip: i64) -> Result<Vec<stellar_core::ScanResult>> {
        self.handler.storage().get_scan_results(task_id, limit, skip).await
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

/// Supervisor task: owns the scanner run plus its two drain tasks, and
/// tears the runner down from the active map on exit.
async fn supervise(
    handler: Arc<ResultHandler>,
    active: Arc<RwLock<HashMap<Uuid, Arc<Runner>>>>,
    mut task: Task,
    cancel: CancellationToken,
    done: Arc<Notify>,
    status_cell: Arc<RwLock<TaskStatus>>,
    progress_cell: Arc<RwLock<f64>>,
) {
    let task_id = task.id;
    let (result_tx, mut result_rx) = mpsc::channel(1000);
    let (progress_tx, mut progress_rx) = mpsc::channel(100);

    let results_handler = handler.clone();
    let results_drain = tokio::spawn(async move {
        while let Some(result) = result_rx.recv().await {
            if let Err(e) = results_handler.handle_scan_result(result).await {
                error!(task = %task_id, error = %e, "failed to persist scan result");
                continue;
            }
            if let Err(e) = results_handler.refresh_aggregate(task_id).await {
                error!(task = %task_id, error = %e, "failed to refresh task aggregate");
            }
        }
    });

    let targets: Vec<stellar_core::ScanTarget> = task.targets.iter().map(stellar_core::ScanTarget::new).collect();
    let progress_handler = handler.clone();
    let mut progress_task = task.clone();
    let progress_drain = tokio::spawn(async move {
        while let Some(tick) = progress_rx.recv().await {
            let pct = if tick.total == 0 { 100.0 } else { (tick.completed as f64 / tick.total as f64) * 100.0 };
            *progress_cell.write() = pct;
            match progress_handler.update_task_progress(progress_task.clone(), pct).await {
                Ok(updated) => progress_task = updated,
                Err(e) => error!(task = %task_id, error = %e, "failed to persist task progress"),
            }
        }
    });

    let scanner = PortScanner::new(RateLimiter::new(task.config.rate_limit));
    let scan_result = scanner
        .run(task_id, &task.project_id, &targets, &task.config, result_tx, progress_tx, cancel.clone())
        .await;

    let _ = results_drain.await;
    let _ = progress_drain.await;

    match scan_result {
        Err(e) => {
            warn!(task = %task_id, error = %e, "task failed");
            task.error = Some(e.to_string());
            task = match handler.update_task_status(task, TaskStatus::Failed).await {
                Ok(t) => t,
                Err(persist_err) => {
                    error!(task = %task_id, error = %persist_err, "failed to persist task failure");
                    task
                }
            };
        }
        Ok(()) if cancel.is_cancelled() => {
            debug!(task = %task_id, "task stopped");
            task = match handler.update_task_status(task, TaskStatus::Stopped).await {
                Ok(t) => t,
                Err(persist_err) => {
                    error!(task = %task_id, error = %persist_err, "failed to persist task stop");
                    task
                }
            };
        }
        Ok(()) => {
            debug!(task = %task_id, "task completed");
            task = match handler.finish_task(task).await {
                Ok(t) => t,
                Err(persist_err) => {
                    error!(task = %task_id, error = %persist_err, "failed to finish task");
                    task
                }
            };
        }
    }

    *status_cell.write() = task.status;
    active.write().remove(&task_id);
    // `notify_one`, not `notify_waiters`: it stores a permit if `stop_task`
    // hasn't called `notified().await` yet, so a supervisor that exits
    // before the waiter arrives (e.g. an empty target list) can't strand it.
    done.notify_one();
}
