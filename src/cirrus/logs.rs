use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use futures::future::join_all;
use log::{debug, warn};
use url::Url;

use super::client::CirrusClient;
use super::types::Task;
use crate::error::Result;

/// A task whose log should be downloaded, with the details used to name the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub task_id: String,
    pub created_timestamp: Option<i64>,
    pub branch: Option<String>,
}

impl LogTarget {
    pub fn for_task(task: &Task, branch: &str) -> Self {
        Self {
            task_id: task.id.clone(),
            created_timestamp: Some(task.creation_timestamp),
            branch: Some(branch.to_string()),
        }
    }

    pub fn for_id(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            created_timestamp: None,
            branch: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<(String, String)>,
}

/// `<log>_<yyyy-MM-dd_HH-mm>_<branch>_<taskId>.log` when the task's creation
/// time and branch are known, `<log>_<taskId>.log` otherwise. Times are UTC.
pub fn log_file_name(log_name: &str, target: &LogTarget) -> String {
    let stem = log_name.strip_suffix(".log").unwrap_or(log_name);

    match (target.created_timestamp, target.branch.as_deref()) {
        (Some(created), Some(branch)) => {
            let date = Utc
                .timestamp_millis_opt(created)
                .single()
                .map(|dt| dt.format("%Y-%m-%d_%H-%M").to_string())
                .unwrap_or_else(|| created.to_string());
            let branch: String = branch
                .chars()
                .map(|c| if matches!(c, '/' | '\\' | ':' | ';') { '_' } else { c })
                .collect();
            format!("{stem}_{date}_{branch}_{}.log", target.task_id)
        }
        _ => format!("{stem}_{}.log", target.task_id),
    }
}

impl CirrusClient {
    /// Log downloads live next to the GraphQL endpoint, on the same origin.
    pub fn log_download_url(&self, task_id: &str, log_name: &str) -> Result<Url> {
        Ok(self
            .graphql_url()
            .join(&format!("/v1/task/{task_id}/logs/{log_name}"))?)
    }

    pub async fn fetch_log(&self, task_id: &str, log_name: &str) -> Result<String> {
        let url = self.log_download_url(task_id, log_name)?;
        debug!("Downloading {url}");

        let response = self
            .send_with_retry(&format!("download of {log_name} for task {task_id}"), || {
                self.http().get(url.clone())
            })
            .await?;

        Ok(response.text().await?)
    }

    /// Fetches one log per task. Tasks whose log cannot be fetched are logged and skipped.
    pub async fn fetch_logs_for_tasks<'a>(
        &self,
        tasks: &'a [Task],
        log_name: &str,
    ) -> Vec<(&'a Task, String)> {
        let results = join_all(tasks.iter().map(|task| async move {
            (task, self.fetch_log(&task.id, log_name).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(task, result)| match result {
                Ok(content) => Some((task, content)),
                Err(e) => {
                    warn!(
                        "Could not fetch {log_name} of task '{}' ({}): {e}",
                        task.name, task.id
                    );
                    None
                }
            })
            .collect()
    }

    pub async fn download_log_to(&self, task_id: &str, log_name: &str, path: &Path) -> Result<()> {
        let content = self.fetch_log(task_id, log_name).await?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Downloads the log of every target into `directory`, calling `on_done`
    /// after each attempt.
    pub async fn download_logs<F>(
        &self,
        targets: &[LogTarget],
        log_name: &str,
        directory: &Path,
        on_done: F,
    ) -> Result<DownloadReport>
    where
        F: Fn(&LogTarget, bool) + Sync,
    {
        tokio::fs::create_dir_all(directory).await?;

        let on_done = &on_done;
        let results = join_all(targets.iter().map(|target| async move {
            let path = directory.join(log_file_name(log_name, target));
            let result = self.download_log_to(&target.task_id, log_name, &path).await;
            on_done(target, result.is_ok());
            (target, path, result)
        }))
        .await;

        let mut report = DownloadReport::default();
        for (target, path, result) in results {
            match result {
                Ok(()) => report.succeeded.push(path),
                Err(e) => {
                    warn!("Failed to download {log_name} for task {}: {e}", target.task_id);
                    report.failed.push((target.task_id.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
