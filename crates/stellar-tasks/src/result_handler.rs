//! Result handler: turns raw scan/POC output into persisted, merged
//! records and keeps each task's aggregate rollup current.
//!
//! Every write goes through a merge-by-key upsert; open port results also
//! derive an asset row, which plain scan-result storage doesn't need.

use chrono::Utc;
use stellar_core::{Aggregate, Poc, PocResult, PortStatus, Result, ScanResult, Task, TaskStatus, Vulnerability};
use uuid::Uuid;

use crate::storage::Storage;

pub struct ResultHandler {
    storage: Storage,
}

impl ResultHandler {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Persist one port-scan result. On an open port, upserts the derived
    /// asset by (project, host, port, protocol), union-merging tags, and
    /// back-references the asset id into the stored result.
    pub async fn handle_scan_result(&self, mut result: ScanResult) -> Result<ScanResult> {
        if result.status == PortStatus::Open {
            let mut tags = vec![result.protocol.to_string()];
            if let Some(service) = &result.service {
                tags.push(service.clone());
            }

            let asset_id = self
                .storage
                .upsert_asset(
                    &result.project_id,
                    &result.host,
                    result.port,
                    result.protocol,
                    result.service.as_deref(),
                    result.version.as_deref(),
                    result.banner.as_deref(),
                    &tags,
                )
                .await?;

            result.asset_id = Some(asset_id);
        }

        result.updated_at = Utc::now();
        self.storage.upsert_scan_result(&result).await?;
        Ok(result)
    }

    /// Persist one vulnerability finding, merged by (project, asset, title,
    /// affectedUrl, affectedHost).
    pub async fn handle_vulnerability(&self, vuln: Vulnerability) -> Result<()> {
        self.storage.upsert_vulnerability(&vuln).await
    }

    /// Persist one POC verification result, associated with the task that
    /// produced it.
    pub async fn handle_poc_result(&self, result: &PocResult, task_id: Uuid) -> Result<()> {
        self.storage.insert_poc_result(result, Some(task_id)).await
    }

    /// Recompute and persist a task's aggregate rollup as a one-shot
    /// aggregation query, not an incrementally mutated counter.
    pub async fn refresh_aggregate(&self, task_id: Uuid) -> Result<Aggregate> {
        let aggregate = self.storage.aggregate_port_scan(task_id).await?;
        if let Some(mut task) = self.storage.get_task(stellar_core::TaskKind::Port, task_id).await? {
            task.result_summary = Some(aggregate.clone());
            self.storage.save_task(&task).await?;
        }
        Ok(aggregate)
    }

    // ---- Task lifecycle --------------------------------------------------

    pub async fn save_task(&self, task: &Task) -> Result<()> {
        self.storage.save_task(task).await
    }

    /// Transition `task` to `status`, stamping `started_at` on first entry
    /// into `Running` and `completed_at` on first entry into any terminal
    /// status.
    pub async fn update_task_status(&self, mut task: Task, status: TaskStatus) -> Result<Task> {
        if status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        if status.is_terminal() && task.completed_at.is_none() {
            task.completed_at = Some(Utc::now());
        }
        task.status = status;
        self.storage.save_task(&task).await?;
        Ok(task)
    }

    pub async fn update_task_progress(&self, mut task: Task, progress: f64) -> Result<Task> {
        task.progress = progress.clamp(0.0, 100.0);
        self.storage.save_task(&task).await?;
        Ok(task)
    }

    /// Mark a task complete: progress to 100, status to completed,
    /// `completed_at` stamped, and the final aggregate rollup attached.
    pub async fn finish_task(&self, mut task: Task) -> Result<Task> {
        task.progress = 100.0;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        if task.kind == stellar_core::TaskKind::Port {
            task.result_summary = Some(self.storage.aggregate_port_scan(task.id).await?);
        }
        self.storage.save_task(&task).await?;
        Ok(task)
    }

    pub async fn save_poc(&self, poc: &Poc) -> Result<()> {
        self.storage.save_poc(poc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stellar_core::{Protocol, ScanConfig, TaskKind};

    async fn handler() -> ResultHandler {
        ResultHandler::new(Storage::new(":memory:", 5).await.unwrap())
    }

    #[tokio::test]
    async fn test_open_result_creates_asset_and_backreferences_id() {
        let handler = handler().await;
        let task_id = Uuid::new_v4();
        let mut result = ScanResult::new(task_id, "proj-1", "10.0.0.1", 80, Protocol::Tcp, PortStatus::Open);
        result.service = Some("http".to_string());

        let saved = handler.handle_scan_result(result).await.unwrap();
        assert!(saved.asset_id.is_some());

        let asset = handler.storage().get_asset(saved.asset_id.unwrap()).await.unwrap().unwrap();
        assert!(asset.tags.contains(&"http".to_string()));
    }

    #[tokio::test]
    async fn test_closed_result_does_not_create_asset() {
        let handler = handler().await;
        let task_id = Uuid::new_v4();
        let result = ScanResult::new(task_id, "proj-1", "10.0.0.1", 81, Protocol::Tcp, PortStatus::Closed);

        let saved = handler.handle_scan_result(result).await.unwrap();
        assert!(saved.asset_id.is_none());
    }

    #[tokio::test]
    async fn test_update_task_status_stamps_started_and_completed_once() {
        let handler = handler().await;
        let task = Task::new("proj-1", TaskKind::Port, vec!["10.0.0.1".to_string()], ScanConfig::default());

        let running = handler.update_task_status(task, TaskStatus::Running).await.unwrap();
        assert!(running.started_at.is_some());
        let started_at = running.started_at;

        let still_running = handler.update_task_status(running, TaskStatus::Running).await.unwrap();
        assert_eq!(still_running.started_at, started_at);

        let completed = handler.update_task_status(still_running, TaskStatus::Completed).await.unwrap();
        assert!(completed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_task_sets_progress_and_status() {
        let handler = handler().await;
        let task = Task::new("proj-1", TaskKind::Port, vec!["10.0.0.1".to_string()], ScanConfig::default());
        let task_id = task.id;

        handler
            .handle_scan_result(ScanResult::new(task_id, "proj-1", "10.0.0.1", 80, Protocol::Tcp, PortStatus::Open))
            .await
            .unwrap();

        let finished = handler.finish_task(task).await.unwrap();
        assert_eq!(finished.progress, 100.0);
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.result_summary.unwrap().open_ports, 1);
    }

    #[tokio::test]
    async fn test_refresh_aggregate_updates_summary_before_completion() {
        let handler = handler().await;
        let task = Task::new("proj-1", TaskKind::Port, vec!["10.0.0.1".to_string()], ScanConfig::default());
        let task_id = task.id;
        handler.save_task(&task).await.unwrap();

        handler
            .handle_scan_result(ScanResult::new(task_id, "proj-1", "10.0.0.1", 80, Protocol::Tcp, PortStatus::Open))
            .await
            .unwrap();

        let aggregate = handler.refresh_aggregate(task_id).await.unwrap();
        assert_eq!(aggregate.open_ports, 1);

        let stored = handler.storage().get_task(TaskKind::Port, task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.result_summary.unwrap().open_ports, 1);
    }

    #[tokio::test]
    async fn test_handle_poc_result_associates_task_id() {
        let handler = handler().await;
        let task_id = Uuid::new_v4();
        let poc_id = Uuid::new_v4();
        let target = stellar_core::PocTarget {
            url: "http://10.0.0.1/".to_string(),
            host: "10.0.0.1".to_string(),
            port: 80,
            scheme: "http".to_string(),
            path: "/".to_string(),
            query: String::new(),
            extras: BTreeMap::new(),
        };
        let result = PocResult::new(poc_id, target);

        handler.handle_poc_result(&result, task_id).await.unwrap();
        let stored = handler.storage().get_poc_results(task_id, 10, 0).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}
